// Error types for EchoNote Core
// Typed error kinds surfaced at the API boundary

use std::time::Duration;

/// Errors surfaced by the core engine.
///
/// Worker bodies match on these variants instead of catching blindly:
/// `Cancelled` finalizes a task as cancelled, `Transient` re-enters the
/// retry loop, everything else finalizes as failed.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration write or API input was rejected before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// A task, event, attachment or artifact file could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Ciphertext tag failure, schema constraint violation, or stale state.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Retryable failure (rate limit, IO glitch). Carries a backoff hint.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Unrecoverable failure (engine load, schema mismatch, unreadable vault).
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Cooperative cancellation was observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        CoreError::Integrity(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient {
            message: msg.into(),
            retry_after: None,
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::Fatal(msg.into())
    }

    /// Whether the retry loop may re-enter the queue for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient { .. })
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
