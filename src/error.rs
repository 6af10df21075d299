//! Error types for shard merge operations
//!
//! This module defines the error taxonomy used throughout the merge engine. Errors are
//! scoped to a single query's merge: nothing here is shared between queries, so a fatal
//! error in one merge never affects another.

use thiserror::Error;

/// Main error type for all merge operations
#[derive(Debug, Error)]
pub enum MergeError {
    /// A shard did not return a usable response
    ///
    /// Recorded by the partial result tracker; never escalated to a query failure.
    #[error("Shard failure: {shard} - {reason}")]
    ShardFailure { shard: String, reason: String },

    /// A returned document has no resolvable unique key
    #[error("Malformed document from shard {shard} at position {position}: {reason}")]
    MalformedDocument {
        shard: String,
        position: usize,
        reason: String,
    },

    /// A wire value could not be unmarshaled for its declared field type
    #[error("Malformed sort value for field '{field}' ({field_type}): {value} - {reason}")]
    MalformedSortValue {
        field: String,
        field_type: String,
        value: String,
        reason: String,
    },

    /// Resolved sort field names or shapes do not match what was requested
    #[error("Sort field protocol mismatch from shard {shard}: expected {expected}, got {actual}")]
    SortFieldProtocolMismatch {
        shard: String,
        expected: String,
        actual: String,
    },

    /// Input validation failed
    #[error("Invalid input: {field} - {reason}. {suggestion}")]
    InvalidInput {
        field: String,
        reason: String,
        suggestion: String,
    },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MergeError {
    /// Create a shard failure record
    pub fn shard_failure(shard: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::ShardFailure {
            shard: shard.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a malformed document error
    pub fn malformed_document(shard: impl std::fmt::Display, position: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            shard: shard.to_string(),
            position,
            reason: reason.into(),
        }
    }

    /// Create a malformed sort value error
    pub fn malformed_sort_value(
        field: impl Into<String>,
        field_type: impl std::fmt::Display,
        value: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedSortValue {
            field: field.into(),
            field_type: field_type.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a sort field protocol mismatch error
    pub fn protocol_mismatch(
        shard: impl std::fmt::Display,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::SortFieldProtocolMismatch {
            shard: shard.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Check if this error belongs to the sort value resolution pass
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedSortValue { .. } | Self::SortFieldProtocolMismatch { .. }
        )
    }

    /// Add operation context to an error, preserving the original error information
    pub fn with_operation_context(self, operation: &str, additional_context: &str) -> Self {
        let context = format!("{}: {}", operation, additional_context);

        match self {
            Self::Io(ref err) => Self::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
            Self::Config(ref msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::ShardFailure { shard, reason } => Self::ShardFailure {
                shard,
                reason: format!("{}: {}", context, reason),
            },
            Self::MalformedDocument {
                shard,
                position,
                reason,
            } => Self::MalformedDocument {
                shard,
                position,
                reason: format!("{}: {}", context, reason),
            },
            Self::InvalidInput {
                field,
                reason,
                suggestion,
            } => Self::InvalidInput {
                field,
                reason: format!("{}: {}", context, reason),
                suggestion,
            },
            _ => self, // For other structured errors, return as-is
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_error = IoError::new(ErrorKind::NotFound, "File not found");
        let merge_error: MergeError = io_error.into();

        match merge_error {
            MergeError::Io(_) => (),
            _ => panic!("Expected IO error"),
        }
    }

    #[test]
    fn test_shard_failure_display() {
        let error = MergeError::shard_failure("shard1/replica2", "connection refused");
        assert_eq!(
            error.to_string(),
            "Shard failure: shard1/replica2 - connection refused"
        );
    }

    #[test]
    fn test_malformed_document_display() {
        let error = MergeError::malformed_document("shard2", 3, "unique key field 'id' is missing");
        assert_eq!(
            error.to_string(),
            "Malformed document from shard shard2 at position 3: unique key field 'id' is missing"
        );
    }

    #[test]
    fn test_malformed_sort_value_display() {
        let value = serde_json::json!("abc");
        let error = MergeError::malformed_sort_value("popularity", "int", &value, "expected an integer");
        let display_str = error.to_string();
        assert!(display_str.contains("'popularity'"));
        assert!(display_str.contains("(int)"));
        assert!(display_str.contains("\"abc\""));
    }

    #[test]
    fn test_protocol_mismatch_display() {
        let error = MergeError::protocol_mismatch("shard1", "popularity", "price");
        assert_eq!(
            error.to_string(),
            "Sort field protocol mismatch from shard shard1: expected popularity, got price"
        );
    }

    #[test]
    fn test_config_error_format() {
        let error = MergeError::config_error("unique_key_field", "cannot be empty", "Set it to the schema's key field");
        if let MergeError::Config(msg) = error {
            assert_eq!(msg, "unique_key_field - cannot be empty: Set it to the schema's key field");
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_error_classification() {
        let failure = MergeError::shard_failure("s1", "timeout");
        let malformed = MergeError::malformed_document("s1", 0, "no key");
        let sort_value = MergeError::malformed_sort_value("f", "long", &serde_json::Value::Null, "bad");
        let mismatch = MergeError::protocol_mismatch("s1", "a", "b");

        assert!(!failure.is_resolution_error());
        assert!(!malformed.is_resolution_error());
        assert!(sort_value.is_resolution_error());
        assert!(mismatch.is_resolution_error());
    }

    #[test]
    fn test_with_operation_context() {
        let error = MergeError::malformed_document("s1", 2, "no key").with_operation_context("merge", "query 42");
        match error {
            MergeError::MalformedDocument { reason, position, .. } => {
                assert_eq!(reason, "merge: query 42: no key");
                assert_eq!(position, 2);
            }
            _ => panic!("Expected MalformedDocument error"),
        }

        let config = MergeError::Config("bad".to_string()).with_operation_context("load", "file");
        assert_eq!(config.to_string(), "Configuration error: load: file: bad");
    }

    #[test]
    fn test_structured_errors_preserved_by_context() {
        let error = MergeError::protocol_mismatch("s1", "a", "b").with_operation_context("resolve", "pass 2");
        assert!(matches!(error, MergeError::SortFieldProtocolMismatch { .. }));
    }
}
