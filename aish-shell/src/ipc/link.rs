//! Wrapper side of the console connection.

use super::protocol::{Frame, IpcError, MAX_FRAME_DATA, read_frame, write_frame};
use crate::chunk::{CHANNEL_CAPACITY, Chunk, StreamEnd};
use std::io;
use std::path::Path;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A connection that has not announced its session yet.
///
/// Output can only be relayed through the [`LinkSender`] returned by
/// [`Link::announce`], so the announcement always goes out first.
#[derive(Debug)]
pub struct Link {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Link {
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| IpcError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("connected to console at {}", path.display());
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self { reader, writer }
    }

    /// Send the announcement and split the link into its two directions.
    pub async fn announce(
        mut self,
        command_line: &str,
    ) -> Result<(LinkSender, LinkReceiver), IpcError> {
        let frame = Frame::Announcement {
            command_line: command_line.to_string(),
        };
        write_frame(&mut self.writer, &frame).await?;
        debug!("announced session: {}", command_line);
        Ok((
            LinkSender {
                writer: self.writer,
            },
            LinkReceiver {
                reader: self.reader,
            },
        ))
    }
}

/// Outbound half: relays sanitized output in call order.
#[derive(Debug)]
pub struct LinkSender {
    writer: OwnedWriteHalf,
}

impl LinkSender {
    /// Relay `data` as one or more output frames. Empty data still produces
    /// a single empty frame.
    pub async fn relay_output(&mut self, data: &[u8]) -> Result<(), IpcError> {
        if data.is_empty() {
            return write_frame(&mut self.writer, &Frame::Output { data: Vec::new() }).await;
        }
        for part in data.chunks(MAX_FRAME_DATA) {
            let frame = Frame::Output {
                data: part.to_vec(),
            };
            write_frame(&mut self.writer, &frame).await?;
        }
        trace!("relayed {} bytes", data.len());
        Ok(())
    }
}

/// Inbound half: injected input from the console.
#[derive(Debug)]
pub struct LinkReceiver {
    reader: OwnedReadHalf,
}

impl LinkReceiver {
    /// Decode injected input into chunks until the console hangs up, the link
    /// breaks, or `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> (mpsc::Receiver<Chunk>, JoinHandle<StreamEnd>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.receive(tx, token));
        (rx, handle)
    }

    async fn receive(mut self, tx: mpsc::Sender<Chunk>, token: CancellationToken) -> StreamEnd {
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => {
                    debug!("link receiver cancelled");
                    return StreamEnd::Closed;
                }
                frame = read_frame(&mut self.reader) => frame,
            };

            match frame {
                Ok(Some(Frame::Input { data })) => {
                    if data.is_empty() {
                        continue;
                    }
                    if tx.send(Chunk::from(data)).await.is_err() {
                        trace!("link consumer gone");
                        return StreamEnd::Closed;
                    }
                }
                Ok(Some(other)) => {
                    warn!("unexpected {} frame from console", other.kind());
                    return StreamEnd::Errored(io::Error::new(
                        io::ErrorKind::InvalidData,
                        IpcError::ProtocolViolation(format!(
                            "unexpected {} frame",
                            other.kind()
                        )),
                    ));
                }
                Ok(None) => {
                    debug!("console closed the link");
                    return StreamEnd::Closed;
                }
                Err(e) => {
                    warn!("link receive failed: {}", e);
                    return StreamEnd::Errored(io::Error::other(e));
                }
            }
        }
    }
}
