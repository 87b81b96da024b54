//! Error types for floe tables
use object_store::Error as ObjectStoreError;

/// A result returned by floe-core
pub type FloeResult<T, E = FloeError> = Result<T, E>;

/// Floe table specific error
#[derive(thiserror::Error, Debug)]
pub enum FloeError {
    /// Error returned when an optimistic commit lost the race against a
    /// concurrent writer. The commit driver retries these.
    #[error("Commit failed: metadata changed concurrently: {0}")]
    CommitConflict(String),

    /// Error returned when the metadata swap may or may not have been applied.
    /// Never retried and never cleaned up; the caller must reconcile out of band.
    #[error("Commit state unknown: {source}")]
    CommitStateUnknown {
        /// Underlying error raised by the metadata store.
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Error returned when producer validation or a snapshot invariant failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Error returned when reading or writing a manifest object failed.
    #[error("Object store error: {source}")]
    ObjectStore {
        /// Storage error details.
        #[from]
        source: ObjectStoreError,
    },

    /// Error returned when encoding or decoding manifest data failed.
    #[error("Failed to encode or decode manifest data: {source}")]
    Avro {
        /// Avro error details.
        #[from]
        source: apache_avro::Error,
    },

    /// Error returned for failures with no more specific variant.
    #[error("Generic error: {0}")]
    Generic(String),
}

impl FloeError {
    /// Create a generic error with the given message
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Whether the commit driver may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FloeError::CommitConflict(_))
    }

    /// Whether attempted manifest lists may be reclaimed after this error.
    ///
    /// Conflict and validation failures leave storage in a known state, so the
    /// files written by failed attempts can be deleted safely. Anything else is
    /// only cleaned up when the table does not require strict cleanup.
    pub fn is_cleanable(&self) -> bool {
        matches!(
            self,
            FloeError::CommitConflict(_) | FloeError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(FloeError::CommitConflict("lost".into()).is_retryable());
        assert!(!FloeError::Validation("bad".into()).is_retryable());
        assert!(!FloeError::generic("other").is_retryable());
        assert!(!FloeError::CommitStateUnknown {
            source: "timeout".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_cleanable_errors() {
        assert!(FloeError::CommitConflict("lost".into()).is_cleanable());
        assert!(FloeError::Validation("bad".into()).is_cleanable());
        assert!(!FloeError::generic("other").is_cleanable());
        assert!(!FloeError::CommitStateUnknown {
            source: "timeout".into(),
        }
        .is_cleanable());
    }
}
