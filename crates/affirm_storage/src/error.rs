//! Storage errors.

use affirm_core::CoreError;

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Entity not found
    #[error("entity not found: {id}")]
    NotFound {
        /// Entity id looked up
        id: String,
    },
    /// A lock was poisoned by a panicking writer
    #[error("lock poisoned: {what}")]
    LockPoisoned {
        /// Which structure
        what: &'static str,
    },
    /// Backing database failure
    #[error("backend error: {reason}")]
    Backend {
        /// Backend message
        reason: String,
    },
    /// Input rejected before touching the store
    #[error("invalid input: {reason}")]
    Invalid {
        /// Why it was rejected
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id } => CoreError::NotFound {
                kind: "Entity".to_string(),
                id,
            },
            other => CoreError::Validation {
                field: "store".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_core_not_found() {
        let err: CoreError = StorageError::NotFound { id: "src:a".to_string() }.into();
        assert_eq!(
            err,
            CoreError::NotFound {
                kind: "Entity".to_string(),
                id: "src:a".to_string()
            }
        );
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::backend("disk full");
        assert_eq!(err.to_string(), "backend error: disk full");
    }
}
