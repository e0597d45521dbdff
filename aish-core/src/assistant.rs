//! Selection of the assistant collaborator.
//!
//! A process talks to exactly one assistant: either the hosted API reached
//! with an API token, or a client supplied by the embedding program.

use crate::collaborators::AssistantClient;
use crate::config::ConfigError;
use std::fmt;
use std::sync::Arc;

/// The configured assistant. The two variants are mutually exclusive.
#[derive(Clone)]
pub enum Assistant {
    /// Hosted API, authenticated with this token.
    Token(ApiToken),
    /// Client provided by the embedding program.
    Client(Arc<dyn AssistantClient>),
}

impl Assistant {
    /// Pick the assistant from the configured sources. Exactly one must be set.
    pub fn select(
        token: Option<String>,
        client: Option<Arc<dyn AssistantClient>>,
    ) -> Result<Self, ConfigError> {
        let token = token.filter(|t| !t.is_empty());
        match (token, client) {
            (Some(token), None) => Ok(Self::Token(ApiToken(token))),
            (None, Some(client)) => Ok(Self::Client(client)),
            (None, None) => Err(ConfigError::NoAssistant),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingAssistants),
        }
    }

    /// The client handle, when one was supplied directly.
    pub fn client(&self) -> Option<&Arc<dyn AssistantClient>> {
        match self {
            Self::Client(client) => Some(client),
            Self::Token(_) => None,
        }
    }
}

impl fmt::Debug for Assistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(token) => f.debug_tuple("Token").field(token).finish(),
            Self::Client(_) => f.write_str("Client(..)"),
        }
    }
}

/// API token that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}
