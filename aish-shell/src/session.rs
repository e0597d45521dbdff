//! Wrapped shell session.
//!
//! Spawns the command under a pty, puts the operator's terminal in raw mode,
//! keeps the pty size in sync, announces the session to the console and runs
//! the [`Multiplexer`] until the shell's output closes.

use crate::chunk;
use crate::ipc::Link;
use crate::multiplexer::{Multiplexer, MuxExit};
use crate::pty::{Pty, PtyError, terminal_size};
use crate::resize::ResizeListener;
use crate::terminal::RawModeGuard;
use aish_core::Shutdown;
use portable_pty::{CommandBuilder, PtySize};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no command to wrap")]
    EmptyCommand,
    #[error(transparent)]
    Pty(#[from] PtyError),
    #[error("failed to enter raw mode: {0}")]
    RawMode(#[source] io::Error),
    #[error("failed to collect child exit status: {0}")]
    Wait(String),
}

/// Command line as announced to the console.
pub fn command_line(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| shell_escape::escape(Cow::Borrowed(arg.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct WrapSession {
    command: Vec<String>,
    link: Option<Link>,
    operator: Box<dyn Read + Send>,
    terminal: Box<dyn Write + Send>,
    raw_mode_fd: Option<RawFd>,
    size: Option<PtySize>,
    shutdown: Option<Arc<Shutdown>>,
}

impl WrapSession {
    /// Wrap `command` on the current terminal.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            link: None,
            operator: Box::new(io::stdin()),
            terminal: Box::new(io::stdout()),
            raw_mode_fd: Some(io::stdin().as_raw_fd()),
            size: None,
            shutdown: None,
        }
    }

    /// Console connection to announce to and relay through.
    pub fn link(mut self, link: Link) -> Self {
        self.link = Some(link);
        self
    }

    /// Replace stdin as the source of operator keystrokes.
    pub fn operator(mut self, operator: impl Read + Send + 'static) -> Self {
        self.operator = Box::new(operator);
        self
    }

    /// Replace stdout as the terminal sink.
    pub fn terminal(mut self, terminal: impl Write + Send + 'static) -> Self {
        self.terminal = Box::new(terminal);
        self
    }

    /// Put `fd` in raw mode for the session, or leave modes alone with `None`.
    pub fn raw_mode(mut self, fd: Option<RawFd>) -> Self {
        self.raw_mode_fd = fd;
        self
    }

    /// Fixed pty size. Without one the pty follows the controlling terminal.
    pub fn size(mut self, size: PtySize) -> Self {
        self.size = Some(size);
        self
    }

    /// Restore the terminal mode from `shutdown`'s pre-exit hook while the
    /// session runs, so a forced exit leaves the terminal usable.
    pub fn shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the session to completion and return the child's exit code.
    pub async fn run(self, token: &CancellationToken) -> Result<u32, SessionError> {
        let Self {
            command,
            link,
            operator,
            terminal,
            raw_mode_fd,
            size,
            shutdown,
        } = self;

        let (program, args) = command.split_first().ok_or(SessionError::EmptyCommand)?;
        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let pty = Arc::new(Pty::spawn(cmd, size.unwrap_or_else(terminal_size))?);
        let announced = command_line(&command);
        info!("wrapping {}", announced);

        let mut raw_mode = match raw_mode_fd.map(RawModeGuard::enter).transpose() {
            Ok(guard) => guard,
            Err(e) => {
                abandon(&pty);
                return Err(SessionError::RawMode(e));
            }
        };

        if let (Some(shutdown), Some(guard)) = (&shutdown, &raw_mode) {
            shutdown.set_pre_exit_hook(guard.restorer());
        }

        let pty_output = match pty.take_reader() {
            Ok(reader) => reader,
            Err(e) => {
                abandon(&pty);
                return Err(e.into());
            }
        };
        let pty_input = match pty.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                abandon(&pty);
                return Err(e.into());
            }
        };

        let session = token.child_token();

        let resize = if size.is_none() {
            let target = Arc::clone(&pty);
            match ResizeListener::spawn(&session, move || {
                if let Err(e) = target.resize(terminal_size()) {
                    debug!("failed to resize pty: {}", e);
                }
            }) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!("window size changes will not be followed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (pty_rx, _pty_reader) = chunk::spawn("pty", pty_output);
        let (operator_rx, _operator_reader) = chunk::spawn("operator", operator);

        let mut mux = Multiplexer::new(pty_rx, pty_input, terminal, session.clone())
            .with_operator(operator_rx);
        if let Some(link) = link {
            match link.announce(&announced).await {
                Ok((sender, receiver)) => {
                    let (peer_rx, _receive_loop) = receiver.spawn(session.clone());
                    mux = mux.with_relay(sender).with_peer(peer_rx);
                }
                Err(e) => warn!("failed to announce session, continuing unlinked: {}", e),
            }
        }

        let exit = mux.run().await;
        debug!("multiplexer finished: {:?}", exit);

        if let Some(guard) = raw_mode.as_mut() {
            guard.restore();
        }
        if let Some(shutdown) = &shutdown {
            shutdown.clear_pre_exit_hook();
        }
        session.cancel();
        if let Some(resize) = resize {
            resize.stop().await;
        }
        drop(mux);
        pty.close();
        if exit == MuxExit::Cancelled
            && let Err(e) = pty.kill()
        {
            debug!("failed to kill child: {}", e);
        }

        let waiter = Arc::clone(&pty);
        let code = tokio::task::spawn_blocking(move || waiter.wait())
            .await
            .map_err(|e| SessionError::Wait(e.to_string()))??;
        debug!("child exited with {}", code);
        Ok(code)
    }
}

/// Tear down a session that failed before it started.
fn abandon(pty: &Pty) {
    if let Err(e) = pty.kill() {
        debug!("failed to kill child: {}", e);
    }
    pty.close();
    if let Err(e) = pty.wait() {
        debug!("failed to reap child: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_line_quotes_arguments() {
        let command = vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()];
        assert_eq!(command_line(&command), "sh -c 'echo hi'");
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let err = WrapSession::new(Vec::new())
            .raw_mode(None)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let err = WrapSession::new(vec!["/nonexistent/aish-test-binary".to_string()])
            .raw_mode(None)
            .operator(io::empty())
            .terminal(io::sink())
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Pty(PtyError::Spawn(_))));
    }
}
