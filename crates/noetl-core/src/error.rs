//! Shared error type for the value/event primitives in this crate.

use thiserror::Error;

/// Result type alias for `noetl-core` operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building or normalizing the shared primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A JSON document could not be converted to a [`crate::value::Value`].
    #[error("value conversion error: {0}")]
    Value(String),

    /// A raw status string does not map to any normalized status.
    #[error("unrecognized status: {0}")]
    UnknownStatus(String),

    /// Internal error, wrapping anything unexpected.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
