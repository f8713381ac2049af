//! Error types for murmur operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR KIND
// ============================================================================

/// High-level error categorization used for retry routing and outcome tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The ledger did not answer in time
    Timeout,
    /// Transport-level failure talking to the ledger
    Network,
    /// Nonce already used or out of order
    NonceConflict,
    /// The ledger refused the write
    Rejected,
    /// The write was malformed before it reached the ledger
    Validation,
    /// The requested data does not exist
    NotFound,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::NonceConflict,
        ErrorKind::Rejected,
        ErrorKind::Validation,
        ErrorKind::NotFound,
    ];

    /// Check if this kind belongs to the fixed retryable allowlist.
    ///
    /// The allowlist does not distinguish idempotent from non-idempotent
    /// operations: a transient failure after the ledger already accepted the
    /// write can lead to a second submission.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::NonceConflict
        )
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::NonceConflict => "nonce_conflict",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LEDGER ERRORS
// ============================================================================

/// Errors raised by the ledger collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger timeout during {operation}")]
    Timeout { operation: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Nonce conflict: {message}")]
    NonceConflict { message: String },

    #[error("Write rejected: {reason}")]
    Rejected { reason: String },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },
}

impl LedgerError {
    /// Get the error kind for categorization.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Timeout { .. } => ErrorKind::Timeout,
            LedgerError::Network { .. } => ErrorKind::Network,
            LedgerError::NonceConflict { .. } => ErrorKind::NonceConflict,
            LedgerError::Rejected { .. } => ErrorKind::Rejected,
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Build an error of the given kind with a free-form detail message.
    pub fn of_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::Timeout => LedgerError::Timeout { operation: detail },
            ErrorKind::Network => LedgerError::Network { message: detail },
            ErrorKind::NonceConflict => LedgerError::NonceConflict { message: detail },
            ErrorKind::Rejected => LedgerError::Rejected { reason: detail },
            ErrorKind::Validation => LedgerError::Validation { reason: detail },
            ErrorKind::NotFound => LedgerError::NotFound { resource: detail },
        }
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

// ============================================================================
// CODEC ERRORS
// ============================================================================

/// Record encoding and decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Schema {schema} expects {expected} fields, got {got}")]
    FieldCountMismatch {
        schema: String,
        expected: usize,
        got: usize,
    },

    #[error("Field {field} expects {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Input truncated while reading {field}: needed {needed} bytes, {remaining} left")]
    Truncated {
        field: String,
        needed: usize,
        remaining: usize,
    },

    #[error("{count} trailing bytes after decoding schema {schema}")]
    TrailingBytes { schema: String, count: usize },

    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: String },

    #[error("Unknown schema: {schema}")]
    UnknownSchema { schema: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

// ============================================================================
// CONFIG ERRORS
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or MURMUR_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse {
            reason: err.to_string(),
        }
    }
}

// ============================================================================
// MASTER ERROR
// ============================================================================

/// Master error type for all murmur errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MurmurError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shared state lock poisoned")]
    LockPoisoned,

    #[error("Background task failed: {reason}")]
    Task { reason: String },
}

impl MurmurError {
    /// The ledger error kind, if this error came from the ledger.
    pub fn ledger_kind(&self) -> Option<ErrorKind> {
        match self {
            MurmurError::Ledger(err) => Some(err.kind()),
            _ => None,
        }
    }
}

/// Result type alias for murmur operations.
pub type MurmurResult<T> = Result<T, MurmurError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_allowlist() {
        let retryable: Vec<_> = ErrorKind::ALL
            .iter()
            .filter(|kind| kind.is_retryable())
            .copied()
            .collect();
        assert_eq!(
            retryable,
            vec![
                ErrorKind::Timeout,
                ErrorKind::Network,
                ErrorKind::NonceConflict
            ]
        );
    }

    #[test]
    fn test_of_kind_round_trips_kind() {
        for kind in ErrorKind::ALL {
            assert_eq!(LedgerError::of_kind(kind, "detail").kind(), kind);
        }
    }

    #[test]
    fn test_ledger_error_display_timeout() {
        let err = LedgerError::Timeout {
            operation: "submit".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timeout"));
        assert!(msg.contains("submit"));
    }

    #[test]
    fn test_codec_error_display_truncated() {
        let err = CodecError::Truncated {
            field: "actor".to_string(),
            needed: 20,
            remaining: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("actor"));
        assert!(msg.contains("20"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "queue.max_batch_size",
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("queue.max_batch_size"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_murmur_error_from_variants() {
        let ledger = MurmurError::from(LedgerError::Network {
            message: "reset".to_string(),
        });
        assert!(matches!(ledger, MurmurError::Ledger(_)));
        assert_eq!(ledger.ledger_kind(), Some(ErrorKind::Network));

        let codec = MurmurError::from(CodecError::UnknownSchema {
            schema: "x".to_string(),
        });
        assert!(matches!(codec, MurmurError::Codec(_)));
        assert_eq!(codec.ledger_kind(), None);

        let config = MurmurError::from(ConfigError::MissingConfigPath);
        assert!(matches!(config, MurmurError::Config(_)));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NonceConflict.to_string(), "nonce_conflict");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }
}
