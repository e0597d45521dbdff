//! Console side of the IPC link.
//!
//! The console accepts one connection per wrapped session. Each connection
//! must open with an announcement; after that the wrapper streams output and
//! the console may inject input through the [`SessionRegistry`].

use super::protocol::{Frame, IpcError, read_frame, write_frame};
use aish_core::{SessionId, SessionRegistry};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Injected input waiting to be written to one wrapper.
const INJECT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Announced { id: SessionId, command_line: String },
    Output { id: SessionId, data: Vec<u8> },
    Disconnected { id: SessionId },
}

#[derive(Debug)]
pub struct ConsoleServer {
    listener: UnixListener,
    path: PathBuf,
    registry: Arc<SessionRegistry>,
}

impl ConsoleServer {
    /// Bind the console socket, replacing a stale socket file. Fails with
    /// [`IpcError::InUse`] when another console still accepts on `path`.
    pub fn bind(path: &Path, registry: Arc<SessionRegistry>) -> Result<Self, IpcError> {
        let bind_err = |source| IpcError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => return Err(IpcError::InUse(path.to_path_buf())),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!("removing stale socket {}", path.display());
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                Err(e) => return Err(bind_err(e)),
            }
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        debug!("console listening at {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            registry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept wrappers until `token` is cancelled.
    pub async fn run(
        &self,
        token: CancellationToken,
        events: mpsc::Sender<ConsoleEvent>,
    ) -> Result<(), IpcError> {
        loop {
            let stream = tokio::select! {
                _ = token.cancelled() => {
                    debug!("console server stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?.0,
            };

            let registry = Arc::clone(&self.registry);
            let events = events.clone();
            let token = token.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve(stream, registry, events, token).await {
                    warn!("wrapper connection failed: {}", e);
                }
            });
        }
    }
}

impl Drop for ConsoleServer {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
            debug!("removed console socket at {}", self.path.display());
        }
    }
}

async fn serve(
    stream: UnixStream,
    registry: Arc<SessionRegistry>,
    events: mpsc::Sender<ConsoleEvent>,
    token: CancellationToken,
) -> Result<(), IpcError> {
    let (mut reader, writer) = stream.into_split();

    let command_line = match read_frame(&mut reader).await? {
        Some(Frame::Announcement { command_line }) => command_line,
        Some(other) => {
            return Err(IpcError::ProtocolViolation(format!(
                "expected announcement, got {} frame",
                other.kind()
            )));
        }
        None => return Ok(()),
    };

    let (inject_tx, inject_rx) = mpsc::channel(INJECT_CAPACITY);
    let id = registry.register(command_line.clone(), inject_tx);
    let _ = events
        .send(ConsoleEvent::Announced { id, command_line })
        .await;

    let injector = tokio::spawn(forward_input(id, writer, inject_rx));

    let result = loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Some(Frame::Output { data })) => {
                trace!("session {}: {} bytes of output", id, data.len());
                let _ = events.send(ConsoleEvent::Output { id, data }).await;
            }
            Ok(Some(other)) => {
                break Err(IpcError::ProtocolViolation(format!(
                    "unexpected {} frame from session {}",
                    other.kind(),
                    id
                )));
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    // Dropping the registry entry closes the injector's channel.
    registry.unregister(id);
    injector.abort();
    let _ = events.send(ConsoleEvent::Disconnected { id }).await;
    debug!("session {} disconnected", id);
    result
}

async fn forward_input(id: SessionId, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &Frame::Input { data }).await {
            warn!("session {}: failed to inject input: {}", id, e);
            break;
        }
    }
}
