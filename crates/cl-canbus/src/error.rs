//! CAN bus error types.

use thiserror::Error;

/// Errors that can occur during CAN bus operations.
#[derive(Debug, Error)]
pub enum CanError {
    #[error("CAN interface error: {0}")]
    Interface(String),

    #[error("Response timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Frame decode error: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for CAN bus results.
pub type CanResult<T> = Result<T, CanError>;
