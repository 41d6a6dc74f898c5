//! Metric identifiers.
//!
//! Every persisted metric has a variant here. Call sites name metrics through
//! these enums; the only place strings appear is [`MetricId::from_str`], used
//! by [`crate::telemetry::MetricsHandle::increment_by_name`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use relay_core::UserId;
use thiserror::Error;

// ============================================================================
// COUNTERS
// ============================================================================

/// Persisted counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricId {
    // Lifetime
    TotalMessagesProcessed,
    SuccessfulResponses,
    FailedResponses,
    LimitExceededCount,
    LlmErrors,
    DatabaseErrors,
    ValidationErrors,
    CacheHits,
    CacheMisses,
    SecurityFlags,
    SuspiciousContentDetected,
    FloodAttemptsBlocked,
    SanitizationApplied,
    AccessDeniedCount,

    // Reset at the start of every UTC day
    TotalInteractionsToday,
    UniqueActiveUsersToday,
    NewUsersToday,
    MessagesSentToday,
    CommandsUsedToday,
    AiResponsesSentToday,
    CallbackQueriesToday,
    PremiumUsersActiveToday,
}

impl MetricId {
    pub const ALL: [MetricId; 22] = [
        Self::TotalMessagesProcessed,
        Self::SuccessfulResponses,
        Self::FailedResponses,
        Self::LimitExceededCount,
        Self::LlmErrors,
        Self::DatabaseErrors,
        Self::ValidationErrors,
        Self::CacheHits,
        Self::CacheMisses,
        Self::SecurityFlags,
        Self::SuspiciousContentDetected,
        Self::FloodAttemptsBlocked,
        Self::SanitizationApplied,
        Self::AccessDeniedCount,
        Self::TotalInteractionsToday,
        Self::UniqueActiveUsersToday,
        Self::NewUsersToday,
        Self::MessagesSentToday,
        Self::CommandsUsedToday,
        Self::AiResponsesSentToday,
        Self::CallbackQueriesToday,
        Self::PremiumUsersActiveToday,
    ];

    /// Counters zeroed by the daily rollover.
    pub const DAILY: [MetricId; 8] = [
        Self::TotalInteractionsToday,
        Self::UniqueActiveUsersToday,
        Self::NewUsersToday,
        Self::MessagesSentToday,
        Self::CommandsUsedToday,
        Self::AiResponsesSentToday,
        Self::CallbackQueriesToday,
        Self::PremiumUsersActiveToday,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Persisted name.
    pub fn name(self) -> &'static str {
        match self {
            Self::TotalMessagesProcessed => "total_messages_processed",
            Self::SuccessfulResponses => "successful_responses",
            Self::FailedResponses => "failed_responses",
            Self::LimitExceededCount => "limit_exceeded_count",
            Self::LlmErrors => "llm_errors",
            Self::DatabaseErrors => "database_errors",
            Self::ValidationErrors => "validation_errors",
            Self::CacheHits => "cache_hits",
            Self::CacheMisses => "cache_misses",
            Self::SecurityFlags => "security_flags",
            Self::SuspiciousContentDetected => "suspicious_content_detected",
            Self::FloodAttemptsBlocked => "flood_attempts_blocked",
            Self::SanitizationApplied => "sanitization_applied",
            Self::AccessDeniedCount => "access_denied_count",
            Self::TotalInteractionsToday => "total_interactions_today",
            Self::UniqueActiveUsersToday => "unique_active_users_today",
            Self::NewUsersToday => "new_users_today",
            Self::MessagesSentToday => "messages_sent_today",
            Self::CommandsUsedToday => "commands_used_today",
            Self::AiResponsesSentToday => "ai_responses_sent_today",
            Self::CallbackQueriesToday => "callback_queries_today",
            Self::PremiumUsersActiveToday => "premium_users_active_today",
        }
    }

    pub fn is_daily(self) -> bool {
        Self::DAILY.contains(&self)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a name matches no [`MetricId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metric '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricId {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

// ============================================================================
// TIMERS AND TIMESTAMPS
// ============================================================================

/// Duration accumulators. Each persists a millisecond total and a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    Response,
}

impl TimerId {
    pub const ALL: [TimerId; 1] = [Self::Response];
    pub const COUNT: usize = Self::ALL.len();

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn total_name(self) -> &'static str {
        match self {
            Self::Response => "response_time_total_ms",
        }
    }

    pub fn count_name(self) -> &'static str {
        match self {
            Self::Response => "response_time_count",
        }
    }
}

/// Epoch-second timestamps. Never incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampId {
    StartedAt,
    LastReset,
}

impl TimestampId {
    pub const ALL: [TimestampId; 2] = [Self::StartedAt, Self::LastReset];
    pub const COUNT: usize = Self::ALL.len();

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StartedAt => "started_at",
            Self::LastReset => "last_reset",
        }
    }
}

// ============================================================================
// FAILURES AND CALLS
// ============================================================================

/// Why a response failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Llm,
    Database,
    Validation,
    /// Counted in `failed_responses` only.
    Other,
}

impl FailureKind {
    /// The per-kind error counter, if any.
    pub fn metric(self) -> Option<MetricId> {
        match self {
            Self::Llm => Some(MetricId::LlmErrors),
            Self::Database => Some(MetricId::DatabaseErrors),
            Self::Validation => Some(MetricId::ValidationErrors),
            Self::Other => None,
        }
    }
}

/// A recording operation dispatched through
/// [`crate::telemetry::MetricsHandle::safe_call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricCall {
    Increment(MetricId, u64),
    RecordDuration(TimerId, Duration),
    RecordFailure(FailureKind),
    RecordActiveUser(UserId),
}
