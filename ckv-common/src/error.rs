//! # Error Taxonomy
//!
//! One error type is shared by every `Store` implementation and the cache
//! facade so callers can match on the failure class without caring which
//! backend produced it.

use thiserror::Error;

/// Result alias used across the workspace.
pub type CkvResult<T> = Result<T, CkvError>;

/// Failure classes surfaced by store backends and the cache facade.
#[derive(Debug, Error)]
pub enum CkvError {
    /// Transport or network failure; the store could not be reached.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The store rejected the command or answered with an unexpected shape.
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    /// Key or member absent where presence was required.
    #[error("not found")]
    NotFound,

    /// Release attempted with a value that does not match the stored owner.
    #[error("lock not owned")]
    LockNotOwned,

    /// Value could not be encoded to (or decoded from) JSON.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl CkvError {
    /// Builds a `StoreUnavailable` error from anything printable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        CkvError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Builds an `OperationFailed` error from anything printable.
    pub fn failed(message: impl Into<String>) -> Self {
        CkvError::OperationFailed {
            message: message.into(),
        }
    }

    /// Returns true for transport-level failures.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CkvError::StoreUnavailable { .. })
    }
}

/// Message used for type mismatches, mirroring the Redis reply text.
pub const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
