//! Error taxonomy for the research pipeline

use thiserror::Error;

/// Errors surfaced by the orchestrator and its configuration layer.
///
/// Only `EmptyQuery` and `Cancelled` ever escape `ResearchAgent::answer`;
/// the collaborator variants are recorded as degraded-mode notes and
/// kept here so stages and adapters can name the failure they absorbed.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Query text is empty")]
    EmptyQuery,

    #[error("Similarity store unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("All configured models failed: {0}")]
    ModelUnavailable(String),

    #[error("Memory store unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failure of a single language-model invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model {model_id} timed out after {timeout_ms}ms")]
    Timeout { model_id: String, timeout_ms: u64 },

    #[error("Model provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Model {0} returned no text")]
    EmptyOutput(String),
}

impl ModelError {
    /// Whether trying a different backing model could help
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout { .. } | ModelError::Transport(_) | ModelError::EmptyOutput(_) => true,
            ModelError::Http { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_model_errors() {
        assert!(ModelError::Timeout { model_id: "m".into(), timeout_ms: 10 }.is_transient());
        assert!(ModelError::Http { status: 529, body: String::new() }.is_transient());
        assert!(ModelError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!ModelError::Http { status: 401, body: String::new() }.is_transient());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(AgentError::EmptyQuery.to_string(), "Query text is empty");
        let err = ModelError::Timeout { model_id: "primary".into(), timeout_ms: 40_000 };
        assert_eq!(err.to_string(), "Model primary timed out after 40000ms");
    }
}
