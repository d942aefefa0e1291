//! Storage error types.

/// Errors from storage operations.
///
/// Absence is never an error: backends report a missing key as `Ok(None)`
/// or `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached, or the connection was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command or query.
    #[error("query error: {0}")]
    Query(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key or pattern is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An internal invariant failed (poisoned lock, panicked worker).
    #[error("storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether this error means the backend is unreachable.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StorageError::Connection("refused".into()).is_connectivity());
        assert!(!StorageError::Query("syntax".into()).is_connectivity());
        assert!(!StorageError::Serialization("eof".into()).is_connectivity());
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = err.into();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }
}
