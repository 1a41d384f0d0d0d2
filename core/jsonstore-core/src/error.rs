//! Error types for the jsonstore record store.
//!
//! All public APIs return `StoreResult<T>`; library code does not panic.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Standard I/O error (disk full, permission denied, ...)
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A dump line that does not parse as a JSON object
    #[error("malformed record in {file}: {line}")]
    MalformedRecord { file: String, line: String },

    /// A `.gz` dump that cannot be inflated
    #[error("corrupt archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// A lazy handle points at bytes that can no longer be read in full
    #[error("truncated record in {path:?} at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        path: PathBuf,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// A capsule carries a short key this codec instance never issued
    #[error("unknown short key '{0}': capsule was not encoded by this codec")]
    UnknownShortKey(String),

    /// A capsule whose tag byte or payload is unreadable
    #[error("invalid capsule: {0}")]
    InvalidCapsule(String),

    /// Lookup on a column that was not declared for the dataset
    #[error("column '{0}' was not declared")]
    ColumnNotDeclared(String),

    /// Rejected configuration value
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Builds a [`StoreError::MalformedRecord`] from raw line bytes.
    pub fn malformed(file: impl Into<String>, line: &[u8]) -> Self {
        StoreError::MalformedRecord {
            file: file.into(),
            line: String::from_utf8_lossy(line).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_malformed_record() {
        let err = StoreError::malformed("own/users_202601_00000001.txt", b"{\"a\":");
        assert_eq!(
            err.to_string(),
            "malformed record in own/users_202601_00000001.txt: {\"a\":"
        );
    }

    #[test]
    fn error_display_column_not_declared() {
        let err = StoreError::ColumnNotDeclared("screen_name".to_string());
        assert_eq!(err.to_string(), "column 'screen_name' was not declared");
    }

    #[test]
    fn error_display_truncated_record() {
        let err = StoreError::TruncatedRecord {
            path: PathBuf::from("dump.txt"),
            offset: 42,
            expected: 10,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 42"));
        assert!(msg.contains("expected 10 bytes, got 3"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(err.to_string().starts_with("io error"));
    }

    #[test]
    fn serde_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = parse.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
