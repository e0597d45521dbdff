//! Shared state and collaborator boundaries for aish.
//!
//! Every wrapped session and every console process builds one
//! [`SessionContext`] at startup and threads it through the shell crate.

mod assistant;
pub mod collaborators;
pub mod config;
mod context;
pub mod prompts;
mod registry;
mod shutdown;

pub use assistant::{ApiToken, Assistant};
pub use collaborators::{
    AssistantClient, AssistantError, BufferSink, CompletionRequest, HistoryEntry, IndexError,
    OutputSink, StdoutSink, Style, VectorIndex,
};
pub use config::{Config, ConfigError};
pub use context::{ContextError, IndexFactory, SessionContext, SessionContextBuilder};
pub use prompts::{DefaultPromptLibrary, DiskPromptLibrary, PromptError, PromptLibrary};
pub use registry::{RegistryError, SessionId, SessionRegistry};
pub use shutdown::Shutdown;

// Re-export for convenience
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
