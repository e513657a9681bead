//! Storage error types.

use scenario_core::StoreError;
use scenario_journal::JournalError;
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("invalid storage type: {0}")]
    InvalidBackend(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) | StorageError::Journal(JournalError::Io(e)) => StoreError::Io(e),
            StorageError::Json(e) => StoreError::Json(e),
            other => StoreError::Backend(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_store_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: StoreError = StorageError::Journal(JournalError::Io(io)).into();
        assert!(matches!(err, StoreError::Io(_)));

        let err: StoreError = StorageError::InvalidBackend("redis".to_string()).into();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(err.to_string().contains("redis"));
    }
}
