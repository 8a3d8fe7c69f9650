//! Storage Error Types
//!
//! Errors reported by a [`PersistenceAdapter`](super::PersistenceAdapter).

use thiserror::Error;

/// Error type for persistence operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Create a generic backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a not-found error for a record id
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound(id.into())
    }

    /// Check if the error is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Network(_) | Self::Timeout { .. } | Self::Unavailable(_)
        )
    }

    /// Check if the error reports a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(StorageError::Io("disk busy".to_string()).is_retryable());
        assert!(StorageError::network("connection reset").is_retryable());
        assert!(StorageError::Timeout { duration_ms: 500 }.is_retryable());

        assert!(!StorageError::backend("constraint violated").is_retryable());
        assert!(!StorageError::not_found("f1").is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::Other, "pipe closed").into();
        assert!(matches!(err, StorageError::Io(msg) if msg.contains("pipe closed")));
    }
}
