//! Error types for the agent-eval library.

use thiserror::Error;

/// Errors that end a submit abnormally.
///
/// Tool faults never show up here; they are recorded as failed tool results
/// and the loop carries on.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The provider failed fatally or ran out of retries
    #[error("Provider error: {0}")]
    Provider(#[from] crate::llm::ProviderError),

    /// The provider answered with something the loop cannot act on
    #[error("Provider contract violation: {0}")]
    ContractViolation(String),

    /// The caller cancelled the submit
    #[error("Cancelled")]
    Cancelled,

    /// An internal guarantee did not hold
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::agent::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
