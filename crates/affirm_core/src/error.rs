//! Core error types for AFFIRM.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Value could not be turned into canonical bytes
    InvalidEncoding {
        /// Underlying serializer message
        reason: String,
    },

    /// Content hash did not match recomputed hash
    HashMismatch {
        /// Hash carried by the object
        expected: String,
        /// Hash recomputed from content
        actual: String,
    },

    /// Invalid hash format
    InvalidHash {
        /// Why the hash was rejected
        reason: String,
    },

    /// Invalid ID format
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Invalid timestamp
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },

    /// Validation error
    Validation {
        /// Offending field
        field: String,
        /// Why it failed
        reason: String,
    },

    /// Not found
    NotFound {
        /// Kind of object
        kind: String,
        /// Identifier looked up
        id: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding { reason } => write!(f, "Invalid encoding: {}", reason),
            Self::HashMismatch { expected, actual } => {
                write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
            }
            Self::InvalidHash { reason } => write!(f, "Invalid hash: {}", reason),
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::InvalidTimestamp { reason } => write!(f, "Invalid timestamp: {}", reason),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::NotFound {
            kind: "Entity".to_string(),
            id: "src:open-meteo".to_string(),
        };
        assert_eq!(format!("{}", err), "Entity not found: src:open-meteo");
    }

    #[test]
    fn test_hash_mismatch_error() {
        let err = CoreError::HashMismatch {
            expected: "sha256:abc123".to_string(),
            actual: "sha256:def456".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("abc123"));
        assert!(s.contains("def456"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = CoreError::from(parse_err);
        assert!(matches!(err, CoreError::InvalidEncoding { .. }));
    }
}
