//! Spool error types.

use thiserror::Error;

/// Errors that can occur in the local spool.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for spool results.
pub type SpoolResult<T> = Result<T, SpoolError>;
