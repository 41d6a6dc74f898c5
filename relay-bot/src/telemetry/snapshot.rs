//! Point-in-time metric views.

use std::collections::BTreeMap;

use relay_core::Timestamp;
use relay_storage::CacheStats;
use serde::Serialize;

use super::metric::MetricId;

/// Copy of every metric plus values derived at snapshot time.
///
/// Rates are percentages in `0.0..=100.0`; every derived value is 0 when its
/// denominator is 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: Timestamp,
    pub initialized: bool,
    pub counters: BTreeMap<&'static str, u64>,
    pub response_time_total_ms: u64,
    pub response_time_count: u64,
    pub started_at: Option<Timestamp>,
    pub last_reset: Option<Timestamp>,
    /// Distinct users seen since the last daily reset.
    pub daily_user_count: usize,

    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_response_time_ms: f64,
    pub uptime_secs: u64,
    pub avg_messages_per_user: f64,

    /// Session cache state, when the caller attached it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

/// Raw values read out of the aggregator.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawMetrics {
    pub initialized: bool,
    pub counters: [u64; MetricId::COUNT],
    pub response_time_total_ms: u64,
    pub response_time_count: u64,
    pub started_at: Option<Timestamp>,
    pub last_reset: Option<Timestamp>,
    pub daily_user_count: usize,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl MetricsSnapshot {
    pub(crate) fn from_raw(raw: RawMetrics, taken_at: Timestamp) -> Self {
        let counter = |id: MetricId| raw.counters[id.index()];

        let successes = counter(MetricId::SuccessfulResponses);
        let failures = counter(MetricId::FailedResponses);
        let hits = counter(MetricId::CacheHits);
        let misses = counter(MetricId::CacheMisses);

        let uptime_secs = raw
            .started_at
            .map(|started| (taken_at - started).num_seconds().max(0) as u64)
            .unwrap_or(0);

        let counters = MetricId::ALL
            .into_iter()
            .map(|id| (id.name(), counter(id)))
            .collect();

        Self {
            taken_at,
            initialized: raw.initialized,
            counters,
            response_time_total_ms: raw.response_time_total_ms,
            response_time_count: raw.response_time_count,
            started_at: raw.started_at,
            last_reset: raw.last_reset,
            daily_user_count: raw.daily_user_count,
            success_rate: ratio(successes, successes + failures) * 100.0,
            cache_hit_rate: ratio(hits, hits + misses) * 100.0,
            avg_response_time_ms: ratio(raw.response_time_total_ms, raw.response_time_count),
            uptime_secs,
            avg_messages_per_user: ratio(
                counter(MetricId::MessagesSentToday),
                counter(MetricId::UniqueActiveUsersToday),
            ),
            cache: None,
        }
    }

    /// Value of one counter.
    pub fn counter(&self, id: MetricId) -> u64 {
        self.counters.get(id.name()).copied().unwrap_or(0)
    }

    /// Attach session cache statistics.
    pub fn with_cache_stats(mut self, stats: CacheStats) -> Self {
        self.cache = Some(stats);
        self
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
