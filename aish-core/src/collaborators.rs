//! Boundaries to the collaborators a session is configured with.
//!
//! The language-model client, the vector index and the console renderer live
//! outside this workspace. Sessions only ever see them through these traits.

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// A completion request as the assistant client receives it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Prior conversation turns, oldest first.
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(String),
    #[error("assistant request cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Language-model client.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Stream a completion into `sink` as it arrives, returning the full text.
    async fn completion_stream(
        &self,
        request: &CompletionRequest,
        sink: &(dyn OutputSink + '_),
    ) -> Result<String, AssistantError>;

    async fn completion(&self, request: &CompletionRequest) -> Result<String, AssistantError>;

    async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AssistantError>;

    async fn edits(
        &self,
        content: &str,
        instruction: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String, AssistantError>;
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to index {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

/// File-content index used for retrieval.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn load_paths(&self, paths: &[PathBuf]) -> Result<(), IndexError>;
}

/// Styles a sink may render. How they look is up to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Foreground,
    Error,
    Grey,
}

/// Byte destination for session output.
pub trait OutputSink: Send + Sync {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()>;

    fn write_styled(&self, _style: Style, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }
}

/// Sink writing straight to the process stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()
    }
}

/// Sink that keeps everything written to it. Useful for tests and for
/// capturing assistant output before it is shown.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl OutputSink for BufferSink {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("buffer sink poisoned"))?
            .extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_collects_writes() {
        let sink = BufferSink::new();
        sink.write_bytes(b"hello ").unwrap();
        sink.write_styled(Style::Error, "world").unwrap();
        assert_eq!(sink.contents_lossy(), "hello world");
    }

    #[test]
    fn test_index_error_display() {
        let err = IndexError::Load {
            path: PathBuf::from("src"),
            message: "denied".into(),
        };
        assert_eq!(err.to_string(), "failed to index src: denied");
    }
}
