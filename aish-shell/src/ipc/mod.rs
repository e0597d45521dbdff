//! Link between a wrapped session and the console.
//!
//! Frames travel over a Unix domain socket using the length-prefixed JSON
//! framing in [`protocol`].

mod link;
pub mod protocol;
mod server;

pub use link::{Link, LinkReceiver, LinkSender};
pub use protocol::{Frame, IpcError};
pub use server::{ConsoleEvent, ConsoleServer};
