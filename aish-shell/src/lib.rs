//! PTY wrapping and session multiplexing for aish.
//!
//! This crate runs a command under a pseudo-terminal, relays the operator's
//! keystrokes and the command's output, and links the session to a console
//! process that observes sanitized output and may inject input.

pub mod chunk;
pub mod ipc;
mod multiplexer;
mod pty;
mod resize;
mod sanitize;
mod session;
mod terminal;

// Byte stream adapters
pub use chunk::{Chunk, StreamEnd};

// Console link
pub use ipc::{ConsoleEvent, ConsoleServer, IpcError, Link, LinkReceiver, LinkSender};

// Multiplexing
pub use multiplexer::{Multiplexer, MuxExit, MuxState, OutputRelay};

// PTY management
pub use pty::{Pty, PtyError, terminal_size};
pub use resize::ResizeListener;

// Terminal utilities
pub use sanitize::sanitize;
pub use terminal::{RawModeGuard, is_tty};

// Main session
pub use session::{SessionError, WrapSession, command_line};

// Re-export for convenience
pub use portable_pty::{CommandBuilder, PtySize};
