//! Error types for Stratum operations

use crate::TierId;
use thiserror::Error;

/// Storage engine faults.
///
/// Engines translate their native errors (LMDB, serde, I/O) into these
/// variants; the tier never inspects them beyond propagating.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Corrupt record: {reason}")]
    CorruptRecord { reason: String },

    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Storage engine is closed")]
    Closed,

    #[error("Operation not supported by {engine}: {operation}")]
    Unsupported { engine: String, operation: String },
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io {
            reason: e.to_string(),
        }
    }
}

/// A mapping could not be read, written or removed.
///
/// Loader and action closures report their own failures through the
/// `Loader` and `Action` variants so they surface unchanged to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Storage access failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Loader failed: {reason}")]
    Loader { reason: String },

    #[error("Invalidation action failed: {reason}")]
    Action { reason: String },
}

impl AccessError {
    /// Build a loader failure.
    pub fn loader(reason: impl Into<String>) -> Self {
        AccessError::Loader {
            reason: reason.into(),
        }
    }

    /// Build an invalidation action failure.
    pub fn action(reason: impl Into<String>) -> Self {
        AccessError::Action {
            reason: reason.into(),
        }
    }
}

/// A provider was handed a tier it does not own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Caching tier {tier_id} is not managed by this provider")]
    UnknownTier { tier_id: TierId },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Stratum errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StratumError {
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Argument error: {0}")]
    Argument(#[from] ArgumentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;

// =============================================================================
// TESTS
// =============================================================================
