//! Constants for the relay bot
//!
//! This module contains all default values used throughout the bot.
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// SESSION CACHE
// ============================================================================

/// Default session TTL in seconds (30 minutes)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Default maximum number of cached users
pub const DEFAULT_SESSION_CAPACITY: usize = 10_000;

// ============================================================================
// FLUSH SCHEDULER
// ============================================================================

/// Default interval between metric flushes in seconds (5 minutes)
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5 * 60;

/// Smallest flush interval accepted by config validation
pub const MIN_FLUSH_INTERVAL_SECS: u64 = 1;

// ============================================================================
// QUOTAS
// ============================================================================

/// Messages a free user may send per UTC day
pub const DEFAULT_FREE_MESSAGE_LIMIT: u32 = 50;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Default tracing filter directive
pub const DEFAULT_LOG_FILTER: &str = "relay_bot=info,relay_storage=info,warn";

/// Prefix for exported Prometheus metric names
pub const PROMETHEUS_NAMESPACE: &str = "relay";

/// Name of the text metric holding today's active user ids
pub const DAILY_USER_IDS_METRIC: &str = "daily_user_ids";
