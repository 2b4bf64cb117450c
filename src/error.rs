//! Error types for feedvault.

use thiserror::Error;

/// Common error type for feedvault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Storage backend error.
    ///
    /// Errors from sqlx are converted here once any retry budget is spent.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Retrieval or parsing failure for a single feed source.
    #[error("source error ({source_id}): {message}")]
    Source { source_id: String, message: String },

    /// A stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The caller-supplied deadline expired.
    #[error("deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),

    /// A spawned task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Build a source error for the given identifier.
    pub fn fetch_failed(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        VaultError::Source {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// True for per-feed failures that are logged and skipped.
    pub fn is_transient_source(&self) -> bool {
        matches!(self, VaultError::Source { .. })
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Codec(e.to_string())
    }
}

/// Result type alias for feedvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
