//! Error types for the bot layer.
//!
//! Store, metrics, config and validation failures arrive as
//! [`RelayError`]; this module adds the failures that only exist once the
//! pieces are wired together.

use relay_core::{ConfigError, RelayError, StorageError, ValidationError};
use thiserror::Error;

/// Bot-level errors.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type alias for bot operations.
pub type BotResult<T> = Result<T, BotError>;

impl From<StorageError> for BotError {
    fn from(err: StorageError) -> Self {
        Self::Relay(err.into())
    }
}

impl From<ConfigError> for BotError {
    fn from(err: ConfigError) -> Self {
        Self::Relay(err.into())
    }
}

impl From<ValidationError> for BotError {
    fn from(err: ValidationError) -> Self {
        Self::Relay(err.into())
    }
}

impl From<prometheus::Error> for BotError {
    fn from(err: prometheus::Error) -> Self {
        Self::Telemetry(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BotError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl BotError {
    /// Whether this wraps a store-level not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Relay(RelayError::Storage(StorageError::NotFound { .. }))
        )
    }
}
