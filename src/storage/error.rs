//! Storage error types.

use thiserror::Error;

use crate::observability::error::ErrorKind;
use crate::storage::backend::BackendError;

/// Failure surfaced by the object storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Blank bucket or object key; rejected before any backend call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Any backend fault, wrapping its cause.
    #[error("Storage operation '{operation}' failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl StorageError {
    pub fn storage(operation: &'static str, source: BackendError) -> Self {
        StorageError::Storage { operation, source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }

    /// The backend cause, when there is one.
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            StorageError::Storage { source, .. } => Some(source),
            StorageError::Validation(_) => None,
        }
    }
}

impl ErrorKind for StorageError {
    fn kind(&self) -> &'static str {
        match self {
            StorageError::Validation(_) => "ValidationFailure",
            StorageError::Storage { .. } => "StorageFailure",
        }
    }
}
