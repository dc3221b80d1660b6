//! Storage boundary error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur at the storage boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store is unavailable (status check failed).
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Why the store is unavailable.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// A persisted record failed checksum or structural validation.
    #[error("corrupt record at '{key}': {reason}")]
    Corruption {
        /// The key holding the corrupt record.
        key: String,
        /// What validation failed.
        reason: &'static str,
    },

    /// A record exceeds the maximum encodable size.
    #[error("record too large: {size} > {max} bytes")]
    RecordTooLarge {
        /// Actual encoded size.
        size: u32,
        /// Maximum allowed size.
        max: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::Corruption {
            key: "info/1/client".to_string(),
            reason: "checksum mismatch",
        };
        assert!(err.to_string().contains("info/1/client"));
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
