//! Registry errors.

use affirm_certify::AuthorityError;
use affirm_core::CoreError;
use affirm_policy::PolicyError;
use affirm_storage::StorageError;

/// Registry result type
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Entity is not registered
    #[error("entity not found: {0}")]
    NotFound(String),
    /// Input failed validation
    #[error("invalid input: {0}")]
    Invalid(String),
    /// Signing or key material failure
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    /// Policy could not be loaded
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id } => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl From<CoreError> for RegistryError {
    fn from(err: CoreError) -> Self {
        Self::Invalid(err.to_string())
    }
}
