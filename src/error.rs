//! Error types for quiver operations.

use crate::VectorId;
use thiserror::Error;

/// Main error type for index, store, and quantizer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input vector length differs from the index dimension. Reject, no retry.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Lookup miss. Non-fatal; propagated to the caller.
    #[error("vector {0} not found")]
    NotFound(VectorId),

    /// Insert collision without the overwrite flag.
    #[error("vector {0} already exists (use insert_overwrite to replace)")]
    DuplicateId(VectorId),

    /// Quantizer training sample too small for stable clustering.
    #[error("insufficient training samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    /// Invalid index or quantizer configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broken entry point or dangling neighbor reference. Fatal: the index
    /// switches to read-only mode and must be rebuilt.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Mutation attempted after the index was flagged for rebuild.
    #[error("index is read-only after an internal inconsistency")]
    ReadOnly,

    /// Query cancelled at a cooperative checkpoint.
    #[error("search cancelled")]
    Cancelled,

    /// Persisted state failed integrity or structural validation.
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),

    /// I/O error from the durable store, after retries.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure for persisted state.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias for quiver operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error indicates a transient failure worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::WouldBlock
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::DimensionMismatch {
            expected: 128,
            actual: 64,
        };
        assert_eq!(e.to_string(), "dimension mismatch: expected 128, got 64");

        let e = Error::InsufficientSamples {
            required: 1024,
            actual: 100,
        };
        assert!(e.to_string().contains("1024"));
    }

    #[test]
    fn test_retriable_classification() {
        let interrupted = Error::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "interrupted",
        ));
        assert!(interrupted.is_retriable());

        let not_found = Error::NotFound(42);
        assert!(!not_found.is_retriable());
    }
}
