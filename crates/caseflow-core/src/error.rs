use thiserror::Error;

/// Core error type for the Caseflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced process, step, action or request does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation attempted on a request that is not in the required status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed or rejected input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic-lock mismatch on a request during a concurrent execute.
    /// Callers may retry with bounded backoff.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else; surfaced to callers as an opaque failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
