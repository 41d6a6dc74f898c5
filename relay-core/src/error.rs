//! Error types for relay operations

use crate::UserId;
use thiserror::Error;

/// Store-side errors surfaced through the persistence and user-store traits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("User not found: {user_id}")]
    NotFound { user_id: UserId },

    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Metrics subsystem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Failed to load metric {name}: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Failed to persist metric {name}: {reason}")]
    PersistFailed { name: String, reason: String },

    #[error("Metrics aggregator not initialized")]
    NotInitialized,
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

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all relay errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl StorageError {
    /// Shorthand for a failed query.
    pub fn query(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
