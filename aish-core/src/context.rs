//! Process-wide session context.
//!
//! Built once at startup and shared by every component. Apart from the lazy
//! vector index nothing in it changes after construction.

use crate::assistant::Assistant;
use crate::collaborators::{AssistantError, IndexError, OutputSink, StdoutSink, Style, VectorIndex};
use crate::prompts::PromptLibrary;
use crate::registry::SessionRegistry;
use crate::shutdown::Shutdown;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Creates the vector index on first use.
pub type IndexFactory = Arc<dyn Fn() -> Arc<dyn VectorIndex> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("session has been cancelled")]
    Cancelled,
    #[error("no vector index is configured")]
    NoIndex,
    #[error("the configured assistant has no client handle")]
    NoAssistantClient,
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

pub struct SessionContext {
    shutdown: Arc<Shutdown>,
    out: Arc<dyn OutputSink>,
    assistant: Assistant,
    prompts: Arc<dyn PromptLibrary>,
    verbose: bool,
    /// Present only in a console-hosting process.
    registry: Option<Arc<SessionRegistry>>,
    index_factory: Option<IndexFactory>,
    vector_index: OnceCell<Arc<dyn VectorIndex>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("shutdown", &self.shutdown)
            .field("assistant", &self.assistant)
            .field("verbose", &self.verbose)
            .field("console_mode", &self.console_mode())
            .field("vector_index_ready", &self.vector_index.initialized())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn builder(assistant: Assistant, prompts: Arc<dyn PromptLibrary>) -> SessionContextBuilder {
        SessionContextBuilder {
            assistant,
            prompts,
            shutdown: None,
            out: None,
            verbose: false,
            registry: None,
            index_factory: None,
        }
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Fire process cancellation.
    pub fn cancel(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn out(&self) -> &Arc<dyn OutputSink> {
        &self.out
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    pub fn prompts(&self) -> &Arc<dyn PromptLibrary> {
        &self.prompts
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn console_mode(&self) -> bool {
        self.registry.is_some()
    }

    pub fn registry(&self) -> Option<&Arc<SessionRegistry>> {
        self.registry.as_ref()
    }

    pub fn print(&self, text: &str) {
        self.styled(Style::Foreground, text);
    }

    pub fn print_error(&self, err: &dyn std::error::Error, prefix: Option<&str>) {
        let text = match prefix {
            Some(prefix) => format!("{prefix} error: {err}\n"),
            None => format!("Error: {err}\n"),
        };
        self.styled(Style::Error, &text);
    }

    fn styled(&self, style: Style, text: &str) {
        if self.is_cancelled() {
            return;
        }
        if let Err(e) = self.out.write_styled(style, text) {
            debug!("failed to write to output sink: {}", e);
        }
    }

    /// The vector index, created on first call.
    ///
    /// Outside console mode the first call also loads `paths`, defaulting to
    /// the current directory. Later calls return the same instance and ignore
    /// `paths`. Concurrent first callers wait for a single initialisation.
    pub async fn vector_index(
        &self,
        paths: &[PathBuf],
    ) -> Result<Arc<dyn VectorIndex>, ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        let factory = self.index_factory.as_ref().ok_or(ContextError::NoIndex)?;

        let index = self
            .vector_index
            .get_or_try_init(|| async {
                let index = factory();
                if !self.console_mode() {
                    let paths = if paths.is_empty() {
                        vec![PathBuf::from(".")]
                    } else {
                        paths.to_vec()
                    };
                    debug!("loading vector index for {:?}", paths);
                    index.load_paths(&paths).await?;
                }
                Ok::<_, ContextError>(index)
            })
            .await?;
        Ok(Arc::clone(index))
    }

    pub async fn calculate_embeddings(
        &self,
        content: &[String],
    ) -> Result<Vec<Vec<f64>>, ContextError> {
        let client = self
            .assistant
            .client()
            .ok_or(ContextError::NoAssistantClient)?;
        Ok(client.embeddings(content).await?)
    }
}

pub struct SessionContextBuilder {
    assistant: Assistant,
    prompts: Arc<dyn PromptLibrary>,
    shutdown: Option<Arc<Shutdown>>,
    out: Option<Arc<dyn OutputSink>>,
    verbose: bool,
    registry: Option<Arc<SessionRegistry>>,
    index_factory: Option<IndexFactory>,
}

impl SessionContextBuilder {
    pub fn shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn output(mut self, out: Arc<dyn OutputSink>) -> Self {
        self.out = Some(out);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Host wrapped sessions: the context gets a session registry.
    pub fn console_mode(mut self) -> Self {
        self.registry = Some(Arc::new(SessionRegistry::new()));
        self
    }

    pub fn index_factory(mut self, factory: IndexFactory) -> Self {
        self.index_factory = Some(factory);
        self
    }

    pub fn build(self) -> SessionContext {
        SessionContext {
            shutdown: self.shutdown.unwrap_or_else(Shutdown::new),
            out: self.out.unwrap_or_else(|| Arc::new(StdoutSink)),
            assistant: self.assistant,
            prompts: self.prompts,
            verbose: self.verbose,
            registry: self.registry,
            index_factory: self.index_factory,
            vector_index: OnceCell::new(),
        }
    }
}
