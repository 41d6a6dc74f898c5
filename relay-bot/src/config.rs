//! Bot Configuration Module
//!
//! Collects the tunables of the cache-and-metrics layer in one place. Values
//! are loaded from `RELAY_*` environment variables with defaults from
//! [`crate::constants`], then handed to the core crates as plain constructor
//! arguments.

use std::time::Duration;

use relay_core::ConfigError;
use relay_storage::SessionCacheConfig;

use crate::constants::{
    DEFAULT_FREE_MESSAGE_LIMIT, DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_TTL_SECS,
    MIN_FLUSH_INTERVAL_SECS,
};
use crate::jobs::FlushConfig;
use crate::telemetry::TelemetryConfig;

// ============================================================================
// BOT CONFIGURATION
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    // ========================================================================
    // Session cache
    // ========================================================================
    /// TTL and capacity of the per-user session cache.
    pub session: SessionCacheConfig,

    // ========================================================================
    // Background work
    // ========================================================================
    /// Flush interval and daily reset toggle.
    pub flush: FlushConfig,

    // ========================================================================
    // Logging
    // ========================================================================
    pub telemetry: TelemetryConfig,

    // ========================================================================
    // Quota
    // ========================================================================
    /// Messages per UTC day allowed without an active subscription.
    pub free_message_limit: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            session: SessionCacheConfig::default()
                .with_ttl(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
                .with_capacity(DEFAULT_SESSION_CAPACITY),
            flush: FlushConfig::default(),
            telemetry: TelemetryConfig::default(),
            free_message_limit: DEFAULT_FREE_MESSAGE_LIMIT,
        }
    }
}

impl BotConfig {
    /// Create BotConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RELAY_SESSION_TTL_SECS`: Session snapshot lifetime (default: 1800)
    /// - `RELAY_SESSION_CAPACITY`: Maximum cached users (default: 10000)
    /// - `RELAY_FREE_MESSAGE_LIMIT`: Daily messages for free users (default: 50)
    ///
    /// Flush and logging settings come from [`FlushConfig::from_env`] and
    /// [`TelemetryConfig::from_env`]. Unparseable values fall back to the
    /// default; call [`Self::validate`] afterwards.
    pub fn from_env() -> Self {
        let session_ttl_secs = std::env::var("RELAY_SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        let session_capacity = std::env::var("RELAY_SESSION_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSION_CAPACITY);

        let free_message_limit = std::env::var("RELAY_FREE_MESSAGE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FREE_MESSAGE_LIMIT);

        Self {
            session: SessionCacheConfig::new()
                .with_ttl(Duration::from_secs(session_ttl_secs))
                .with_capacity(session_capacity),
            flush: FlushConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            free_message_limit,
        }
    }

    /// Short TTL and flush interval, human-readable debug logs.
    pub fn development() -> Self {
        Self {
            session: SessionCacheConfig::new()
                .with_ttl(Duration::from_secs(60))
                .with_capacity(1_000),
            flush: FlushConfig::development(),
            telemetry: TelemetryConfig {
                log_filter: "relay_bot=debug,relay_storage=debug,info".to_string(),
                ..TelemetryConfig::default()
            },
            free_message_limit: DEFAULT_FREE_MESSAGE_LIMIT,
        }
    }

    /// Defaults with JSON logs.
    pub fn production() -> Self {
        Self {
            flush: FlushConfig::production(),
            telemetry: TelemetryConfig {
                json_logs: true,
                ..TelemetryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject values the layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "session.ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.flush.interval < Duration::from_secs(MIN_FLUSH_INTERVAL_SECS) {
            return Err(ConfigError::InvalidValue {
                field: "flush.interval".to_string(),
                value: format!("{}ms", self.flush.interval.as_millis()),
                reason: format!("must be at least {}s", MIN_FLUSH_INTERVAL_SECS),
            });
        }

        if self.free_message_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "free_message_limit".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.telemetry.log_filter.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "telemetry.log_filter".to_string(),
            });
        }

        Ok(())
    }
}
