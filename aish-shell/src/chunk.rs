//! Blocking reader to channel adapter.
//!
//! A dedicated thread reads from a blocking byte source and publishes every
//! non-empty read as an owned [`Chunk`]. The channel closes when the thread
//! stops, which is the only way a consumer learns the source is done.

use std::fmt;
use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

/// Read buffer size.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Channel capacity between an adapter and its consumer.
pub const CHANNEL_CAPACITY: usize = 64;

/// Bytes produced by one read.
///
/// Always an owned copy: the reader's buffer is reused for the next read.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk(Box<[u8]>);

impl Chunk {
    pub fn new(data: &[u8]) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into_boxed_slice())
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Chunk")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

/// Why a producer stopped.
///
/// Consumers only see the channel close; this is for callers that want to
/// know whether the source ended cleanly.
#[derive(Debug)]
pub enum StreamEnd {
    Closed,
    Errored(io::Error),
}

impl StreamEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Errored(_))
    }
}

/// Spawn a reader thread with the default buffer size.
pub fn spawn<R>(name: &str, reader: R) -> (mpsc::Receiver<Chunk>, JoinHandle<StreamEnd>)
where
    R: Read + Send + 'static,
{
    spawn_with_capacity(name, reader, CHUNK_SIZE)
}

/// Spawn a reader thread that reads at most `buf_size` bytes at a time.
pub fn spawn_with_capacity<R>(
    name: &str,
    reader: R,
    buf_size: usize,
) -> (mpsc::Receiver<Chunk>, JoinHandle<StreamEnd>)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let name = name.to_string();
    let handle = thread::spawn(move || read_into(&name, reader, buf_size, tx));
    (rx, handle)
}

/// Read until end of stream, an error, or the consumer going away.
///
/// `tx` is dropped on return, closing the channel exactly once.
pub fn read_into<R: Read>(
    name: &str,
    mut reader: R,
    buf_size: usize,
    tx: mpsc::Sender<Chunk>,
) -> StreamEnd {
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("{}: end of stream", name);
                return StreamEnd::Closed;
            }
            Ok(n) => {
                if tx.blocking_send(Chunk::new(&buf[..n])).is_err() {
                    tracing::trace!("{}: consumer gone", name);
                    return StreamEnd::Closed;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // A pty master reports EIO once the child side has hung up.
                if e.raw_os_error() == Some(libc::EIO) {
                    tracing::debug!("{}: read error: {}", name, e);
                } else {
                    tracing::warn!("{}: read error: {}", name, e);
                }
                return StreamEnd::Errored(e);
            }
        }
    }
}
