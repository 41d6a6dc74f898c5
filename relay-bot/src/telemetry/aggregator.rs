//! Metrics aggregator.
//!
//! Every metric is a pair of atomics: the live `value` and the last value
//! successfully written through the [`PersistenceGateway`]. A record is dirty
//! while the two differ, so:
//!
//! - an increment that lands while a flush is writing the same record leaves
//!   it dirty and the next flush picks it up;
//! - a failed write leaves `persisted` untouched and the record stays dirty;
//! - flushing twice with no increments in between writes nothing the second
//!   time.
//!
//! Nothing is recorded before [`MetricsAggregator::load`] succeeds. Recording
//! into an unloaded aggregator would let the first flush overwrite persisted
//! totals with small in-process counts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use relay_core::{
    from_epoch_secs, to_epoch_secs, Clock, HealthCheck, MetricsError, RelayError, RelayResult,
    Timestamp, UserId,
};
use relay_storage::PersistenceGateway;

use super::metric::{FailureKind, MetricId, TimerId, TimestampId};
use super::snapshot::{MetricsSnapshot, RawMetrics};
use crate::constants::DAILY_USER_IDS_METRIC;

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Default)]
struct Record {
    value: AtomicU64,
    persisted: AtomicU64,
}

impl Record {
    fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn is_dirty(&self) -> bool {
        self.get() != self.persisted.load(Ordering::Acquire)
    }

    fn restore(&self, value: u64, persisted: u64) {
        self.value.store(value, Ordering::Release);
        self.persisted.store(persisted, Ordering::Release);
    }
}

/// Today's distinct user ids, persisted as one text metric.
#[derive(Debug, Default)]
struct DailyUsers {
    ids: HashSet<UserId>,
    version: u64,
    persisted_version: u64,
}

impl DailyUsers {
    fn encode(&self) -> String {
        let mut ids: Vec<i64> = self.ids.iter().map(|id| id.get()).collect();
        ids.sort_unstable();
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn decode(text: &str) -> HashSet<UserId> {
        let mut skipped = 0usize;
        let ids = text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse::<i64>() {
                Ok(raw) => Some(UserId::new(raw)),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            tracing::warn!(skipped, "Ignored malformed entries in stored daily user ids");
        }
        ids
    }
}

fn to_stored(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// FLUSH REPORT
// ============================================================================

/// One record that could not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushFailure {
    pub name: &'static str,
    pub error: RelayError,
}

/// Outcome of one [`MetricsAggregator::flush`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Records written successfully.
    pub flushed: usize,
    pub failures: Vec<FlushFailure>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// In-memory metric state with dirty tracking.
pub struct MetricsAggregator {
    counters: [Record; MetricId::COUNT],
    timer_totals: [Record; TimerId::COUNT],
    timer_counts: [Record; TimerId::COUNT],
    timestamps: [Record; TimestampId::COUNT],
    daily_users: Mutex<DailyUsers>,
    initialized: AtomicBool,
    last_flush_failed: AtomicBool,
    /// Serializes `load` and `flush`.
    flush_lock: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("initialized", &self.is_initialized())
            .field("last_flush_failed", &self.last_flush_failed())
            .finish_non_exhaustive()
    }
}

impl MetricsAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: std::array::from_fn(|_| Record::default()),
            timer_totals: std::array::from_fn(|_| Record::default()),
            timer_counts: std::array::from_fn(|_| Record::default()),
            timestamps: std::array::from_fn(|_| Record::default()),
            daily_users: Mutex::new(DailyUsers::default()),
            initialized: AtomicBool::new(false),
            last_flush_failed: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
            clock,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether the most recent flush had at least one failed record.
    pub fn last_flush_failed(&self) -> bool {
        self.last_flush_failed.load(Ordering::Relaxed)
    }

    fn daily(&self) -> MutexGuard<'_, DailyUsers> {
        self.daily_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn records(&self) -> impl Iterator<Item = (&'static str, &Record)> + '_ {
        let counters = MetricId::ALL
            .into_iter()
            .map(|id| (id.name(), &self.counters[id.index()]));
        let timers = TimerId::ALL.into_iter().flat_map(|id| {
            [
                (id.total_name(), &self.timer_totals[id.index()]),
                (id.count_name(), &self.timer_counts[id.index()]),
            ]
        });
        let timestamps = TimestampId::ALL
            .into_iter()
            .map(|id| (id.name(), &self.timestamps[id.index()]));
        counters.chain(timers).chain(timestamps)
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Add `delta` to a counter. Dropped silently before `load`.
    pub fn increment(&self, id: MetricId, delta: u64) {
        if !self.is_initialized() {
            return;
        }
        self.counters[id.index()]
            .value
            .fetch_add(delta, Ordering::AcqRel);
    }

    /// Current value of a counter.
    pub fn get(&self, id: MetricId) -> u64 {
        self.counters[id.index()].get()
    }

    /// Add one observation to a timer.
    pub fn record_duration(&self, id: TimerId, duration: Duration) {
        if !self.is_initialized() {
            return;
        }
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.timer_totals[id.index()]
            .value
            .fetch_add(millis, Ordering::AcqRel);
        self.timer_counts[id.index()]
            .value
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Mean duration in milliseconds, 0 with no observations.
    pub fn average_millis(&self, id: TimerId) -> f64 {
        let count = self.timer_counts[id.index()].get();
        if count == 0 {
            return 0.0;
        }
        self.timer_totals[id.index()].get() as f64 / count as f64
    }

    /// Count a failed response and its per-kind error counter.
    pub fn record_failure(&self, kind: FailureKind) {
        self.increment(MetricId::FailedResponses, 1);
        if let Some(id) = kind.metric() {
            self.increment(id, 1);
        }
    }

    /// Note that `user_id` was active today.
    ///
    /// Bumps `unique_active_users_today` the first time an id is seen since
    /// the last daily reset. Returns whether the id was new.
    pub fn record_active_user(&self, user_id: UserId) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let mut daily = self.daily();
        if !daily.ids.insert(user_id) {
            return false;
        }
        daily.version += 1;
        self.increment(MetricId::UniqueActiveUsersToday, 1);
        true
    }

    /// Today's active user ids, sorted.
    pub fn daily_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.daily().ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop daily ids that are not in `existing`. Returns how many were
    /// removed; the unique-user counter is set to what remains.
    pub fn retain_daily_users(&self, existing: &[UserId]) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        let existing: HashSet<UserId> = existing.iter().copied().collect();
        let mut daily = self.daily();
        let before = daily.ids.len();
        daily.ids.retain(|id| existing.contains(id));
        let removed = before - daily.ids.len();
        if removed > 0 {
            daily.version += 1;
            self.counters[MetricId::UniqueActiveUsersToday.index()]
                .value
                .store(daily.ids.len() as u64, Ordering::Release);
            tracing::info!(
                removed,
                remaining = daily.ids.len(),
                "Removed unknown users from daily active set"
            );
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Timestamps and daily reset
    // ------------------------------------------------------------------------

    /// A stored timestamp, `None` when never set.
    pub fn timestamp(&self, id: TimestampId) -> Option<Timestamp> {
        match self.timestamps[id.index()].get() {
            0 => None,
            secs => from_epoch_secs(to_stored(secs)),
        }
    }

    fn stamp(&self, id: TimestampId, at: Timestamp) {
        let secs = u64::try_from(to_epoch_secs(at)).unwrap_or(0);
        self.timestamps[id.index()]
            .value
            .store(secs, Ordering::Release);
    }

    /// Zero `ids` and stamp `last_reset`.
    ///
    /// Resetting `unique_active_users_today` also clears the daily id set.
    pub fn reset_daily(&self, ids: &[MetricId]) {
        if !self.is_initialized() {
            return;
        }
        let mut daily = self.daily();
        for id in ids {
            self.counters[id.index()].value.store(0, Ordering::Release);
        }
        if ids.contains(&MetricId::UniqueActiveUsersToday) && !daily.ids.is_empty() {
            daily.ids.clear();
            daily.version += 1;
        }
        drop(daily);
        self.stamp(TimestampId::LastReset, self.clock.wall_now());
    }

    /// Reset the daily counters if `last_reset` falls on an earlier UTC day.
    pub fn rollover_if_new_day(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let now = self.clock.wall_now();
        let due = match self.timestamp(TimestampId::LastReset) {
            Some(last) => last.date_naive() < now.date_naive(),
            None => true,
        };
        if due {
            self.reset_daily(&MetricId::DAILY);
            tracing::info!(date = %now.date_naive(), "Daily metrics reset");
        }
        due
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Load persisted values and start accepting increments.
    ///
    /// A read failure aborts the load and leaves the aggregator uninitialized.
    /// Calling `load` on an initialized aggregator is a no-op.
    pub async fn load<G>(&self, gateway: &G) -> RelayResult<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        let _guard = self.flush_lock.lock().await;
        if self.is_initialized() {
            tracing::warn!("Metrics aggregator already loaded; ignoring load");
            return Ok(());
        }

        let mut counters = [0u64; MetricId::COUNT];
        for id in MetricId::ALL {
            counters[id.index()] = read_counter(gateway, id.name()).await?;
        }

        let mut totals = [0u64; TimerId::COUNT];
        let mut counts = [0u64; TimerId::COUNT];
        for id in TimerId::ALL {
            totals[id.index()] = read_counter(gateway, id.total_name()).await?;
            counts[id.index()] = read_counter(gateway, id.count_name()).await?;
        }

        let now = to_epoch_secs(self.clock.wall_now());
        let mut stamps = [(0u64, 0u64); TimestampId::COUNT];
        for id in TimestampId::ALL {
            let stored = read_metric(gateway, id.name()).await?;
            let value = if stored <= 0 {
                now
            } else if stored > now {
                tracing::warn!(
                    metric = id.name(),
                    stored,
                    now,
                    "Stored timestamp is in the future; resetting to now"
                );
                now
            } else {
                stored
            };
            stamps[id.index()] = (
                u64::try_from(value).unwrap_or(0),
                u64::try_from(stored).unwrap_or(0),
            );
        }

        let daily_ids = match gateway.get_text_metric(DAILY_USER_IDS_METRIC).await {
            Ok(Some(text)) => DailyUsers::decode(&text),
            Ok(None) => HashSet::new(),
            Err(e) => return Err(load_failed(DAILY_USER_IDS_METRIC, e)),
        };

        for id in MetricId::ALL {
            let v = counters[id.index()];
            self.counters[id.index()].restore(v, v);
        }
        for id in TimerId::ALL {
            let (total, count) = (totals[id.index()], counts[id.index()]);
            self.timer_totals[id.index()].restore(total, total);
            self.timer_counts[id.index()].restore(count, count);
        }
        for id in TimestampId::ALL {
            let (value, persisted) = stamps[id.index()];
            self.timestamps[id.index()].restore(value, persisted);
        }
        let daily_count = daily_ids.len();
        *self.daily() = DailyUsers {
            ids: daily_ids,
            version: 0,
            persisted_version: 0,
        };

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            total_messages = counters[MetricId::TotalMessagesProcessed.index()],
            daily_users = daily_count,
            "Metrics loaded"
        );
        Ok(())
    }

    /// Write every dirty record.
    ///
    /// A failed record is reported and stays dirty; the others are still
    /// written. Before `load` this writes nothing.
    pub async fn flush<G>(&self, gateway: &G) -> FlushReport
    where
        G: PersistenceGateway + ?Sized,
    {
        let mut report = FlushReport::default();
        if !self.is_initialized() {
            tracing::debug!("Skipping flush: metrics not loaded");
            return report;
        }

        let _guard = self.flush_lock.lock().await;

        for (name, record) in self.records() {
            let value = record.get();
            if value == record.persisted.load(Ordering::Acquire) {
                continue;
            }
            match gateway.set_metric(name, to_stored(value)).await {
                Ok(()) => {
                    record.persisted.store(value, Ordering::Release);
                    report.flushed += 1;
                }
                Err(error) => {
                    tracing::warn!(metric = name, error = %error, "Failed to persist metric");
                    report.failures.push(FlushFailure {
                        name,
                        error: persist_failed(name, error),
                    });
                }
            }
        }

        let pending = {
            let daily = self.daily();
            (daily.version != daily.persisted_version).then(|| (daily.version, daily.encode()))
        };
        if let Some((version, text)) = pending {
            match gateway.set_text_metric(DAILY_USER_IDS_METRIC, &text).await {
                Ok(()) => {
                    let mut daily = self.daily();
                    daily.persisted_version = daily.persisted_version.max(version);
                    report.flushed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        metric = DAILY_USER_IDS_METRIC,
                        error = %error,
                        "Failed to persist daily user ids"
                    );
                    report.failures.push(FlushFailure {
                        name: DAILY_USER_IDS_METRIC,
                        error: persist_failed(DAILY_USER_IDS_METRIC, error),
                    });
                }
            }
        }

        self.last_flush_failed
            .store(!report.is_clean(), Ordering::Relaxed);
        if report.flushed > 0 || !report.is_clean() {
            tracing::debug!(
                flushed = report.flushed,
                failed = report.failures.len(),
                "Metrics flush completed"
            );
        }
        report
    }

    /// Number of records waiting to be flushed.
    pub fn dirty_count(&self) -> usize {
        let records = self.records().filter(|(_, r)| r.is_dirty()).count();
        let daily = self.daily();
        records + usize::from(daily.version != daily.persisted_version)
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    /// Copy of the current values. Never touches the gateway.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut raw = RawMetrics {
            initialized: self.is_initialized(),
            response_time_total_ms: self.timer_totals[TimerId::Response.index()].get(),
            response_time_count: self.timer_counts[TimerId::Response.index()].get(),
            started_at: self.timestamp(TimestampId::StartedAt),
            last_reset: self.timestamp(TimestampId::LastReset),
            daily_user_count: self.daily().ids.len(),
            ..Default::default()
        };
        for id in MetricId::ALL {
            raw.counters[id.index()] = self.get(id);
        }
        MetricsSnapshot::from_raw(raw, self.clock.wall_now())
    }

    /// Offline until loaded; lagging while the last flush left records behind.
    pub fn health(&self) -> HealthCheck {
        if !self.is_initialized() {
            HealthCheck::offline("metrics", "metrics not loaded")
        } else if self.last_flush_failed() {
            HealthCheck::lagging("metrics", self.dirty_count())
        } else {
            HealthCheck::healthy("metrics")
        }
    }
}

async fn read_metric<G>(gateway: &G, name: &'static str) -> RelayResult<i64>
where
    G: PersistenceGateway + ?Sized,
{
    gateway
        .get_metric(name)
        .await
        .map_err(|e| load_failed(name, e))
}

async fn read_counter<G>(gateway: &G, name: &'static str) -> RelayResult<u64>
where
    G: PersistenceGateway + ?Sized,
{
    let stored = read_metric(gateway, name).await?;
    if stored < 0 {
        tracing::warn!(metric = name, stored, "Negative stored counter; clamping to 0");
        return Ok(0);
    }
    Ok(stored as u64)
}

fn load_failed(name: &str, error: RelayError) -> RelayError {
    tracing::error!(metric = name, error = %error, "Failed to load metric");
    MetricsError::LoadFailed {
        name: name.to_string(),
        reason: error.to_string(),
    }
    .into()
}

fn persist_failed(name: &str, error: RelayError) -> RelayError {
    MetricsError::PersistFailed {
        name: name.to_string(),
        reason: error.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::InMemoryGateway;
    use relay_core::HealthStatus;
    use relay_test_utils::{FailingGateway, ManualClock};

    async fn loaded(gateway: &InMemoryGateway) -> (MetricsAggregator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let aggregator = MetricsAggregator::new(clock.clone());
        aggregator.load(gateway).await.unwrap();
        (aggregator, clock)
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    #[tokio::test]
    async fn test_increment_before_load_is_dropped() {
        let gateway = InMemoryGateway::new().with_metric("cache_hits", 40);
        let aggregator = MetricsAggregator::new(Arc::new(ManualClock::new()));

        aggregator.increment(MetricId::CacheHits, 5);
        assert_eq!(aggregator.flush(&gateway).await, FlushReport::default());
        assert_eq!(gateway.value("cache_hits"), 40);

        aggregator.load(&gateway).await.unwrap();
        aggregator.increment(MetricId::CacheHits, 1);
        assert_eq!(aggregator.get(MetricId::CacheHits), 41);
    }

    #[tokio::test]
    async fn test_failed_load_stays_uninitialized() {
        let gateway = FailingGateway::new();
        gateway.fail_reads(true);
        let aggregator = MetricsAggregator::new(Arc::new(ManualClock::new()));

        let err = aggregator.load(&gateway).await.unwrap_err();
        assert!(matches!(err, RelayError::Metrics(MetricsError::LoadFailed { .. })));
        assert!(!aggregator.is_initialized());

        aggregator.increment(MetricId::CacheHits, 1);
        assert_eq!(aggregator.get(MetricId::CacheHits), 0);
    }

    #[tokio::test]
    async fn test_load_clamps_negative_counters() {
        let gateway = InMemoryGateway::new().with_metric("failed_responses", -3);
        let (aggregator, _) = loaded(&gateway).await;
        assert_eq!(aggregator.get(MetricId::FailedResponses), 0);
    }

    #[tokio::test]
    async fn test_load_replaces_future_and_unset_timestamps() {
        let clock = Arc::new(ManualClock::new());
        let now = to_epoch_secs(clock.wall_now());
        let gateway = InMemoryGateway::new().with_metric("started_at", now + 86_400);
        let aggregator = MetricsAggregator::new(clock.clone());

        aggregator.load(&gateway).await.unwrap();

        let started = aggregator.timestamp(TimestampId::StartedAt).unwrap();
        assert_eq!(to_epoch_secs(started), now);
        let reset = aggregator.timestamp(TimestampId::LastReset).unwrap();
        assert_eq!(to_epoch_secs(reset), now);

        // Both corrections get written back.
        aggregator.flush(&gateway).await;
        assert_eq!(gateway.value("started_at"), now);
        assert_eq!(gateway.value("last_reset"), now);
    }

    #[tokio::test]
    async fn test_load_keeps_past_timestamp() {
        let clock = Arc::new(ManualClock::new());
        let past = to_epoch_secs(clock.wall_now()) - 3_600;
        let gateway = InMemoryGateway::new().with_metric("started_at", past);
        let aggregator = MetricsAggregator::new(clock);

        aggregator.load(&gateway).await.unwrap();
        let started = aggregator.timestamp(TimestampId::StartedAt).unwrap();
        assert_eq!(to_epoch_secs(started), past);
    }

    #[tokio::test]
    async fn test_second_load_is_ignored() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;
        aggregator.increment(MetricId::CacheHits, 2);

        gateway.set_metric("cache_hits", 100).await.unwrap();
        aggregator.load(&gateway).await.unwrap();

        assert_eq!(aggregator.get(MetricId::CacheHits), 2);
    }

    // ========================================================================
    // Flush
    // ========================================================================

    #[tokio::test]
    async fn test_flush_writes_only_dirty_records() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;
        // Timestamps were stamped at load.
        aggregator.flush(&gateway).await;
        let writes = gateway.write_count();

        aggregator.increment(MetricId::TotalMessagesProcessed, 3);
        let report = aggregator.flush(&gateway).await;

        assert_eq!(report.flushed, 1);
        assert_eq!(gateway.write_count(), writes + 1);
        assert_eq!(gateway.value("total_messages_processed"), 3);
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;
        aggregator.increment(MetricId::CacheMisses, 7);

        aggregator.flush(&gateway).await;
        let writes = gateway.write_count();
        let second = aggregator.flush(&gateway).await;

        assert_eq!(second.flushed, 0);
        assert_eq!(gateway.write_count(), writes);
        assert_eq!(gateway.value("cache_misses"), 7);
    }

    #[tokio::test]
    async fn test_failed_record_stays_dirty_and_others_persist() {
        let gateway = FailingGateway::new();
        let clock = Arc::new(ManualClock::new());
        let aggregator = MetricsAggregator::new(clock);
        aggregator.load(&gateway).await.unwrap();

        aggregator.increment(MetricId::CacheHits, 2);
        aggregator.increment(MetricId::CacheMisses, 1);
        gateway.fail_writes_for("cache_hits");

        let report = aggregator.flush(&gateway).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "cache_hits");
        assert!(matches!(
            &report.failures[0].error,
            RelayError::Metrics(MetricsError::PersistFailed { name, .. }) if name == "cache_hits"
        ));
        assert_eq!(gateway.inner().value("cache_misses"), 1);
        assert_eq!(gateway.inner().value("cache_hits"), 0);
        assert!(aggregator.last_flush_failed());
        assert_eq!(aggregator.health().status, HealthStatus::Lagging { pending: 1 });

        gateway.heal();
        let report = aggregator.flush(&gateway).await;
        assert!(report.is_clean());
        assert_eq!(gateway.inner().value("cache_hits"), 2);
        assert!(aggregator.health().is_healthy());
    }

    // ========================================================================
    // Timers, failures, daily users
    // ========================================================================

    #[tokio::test]
    async fn test_record_duration_average() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;
        assert_eq!(aggregator.average_millis(TimerId::Response), 0.0);

        aggregator.record_duration(TimerId::Response, Duration::from_millis(100));
        aggregator.record_duration(TimerId::Response, Duration::from_millis(300));

        assert!((aggregator.average_millis(TimerId::Response) - 200.0).abs() < 1e-9);
        aggregator.flush(&gateway).await;
        assert_eq!(gateway.value("response_time_total_ms"), 400);
        assert_eq!(gateway.value("response_time_count"), 2);
    }

    #[tokio::test]
    async fn test_record_failure_counts_kind() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;

        aggregator.record_failure(FailureKind::Database);
        aggregator.record_failure(FailureKind::Other);

        assert_eq!(aggregator.get(MetricId::FailedResponses), 2);
        assert_eq!(aggregator.get(MetricId::DatabaseErrors), 1);
        assert_eq!(aggregator.get(MetricId::LlmErrors), 0);
    }

    #[tokio::test]
    async fn test_active_users_counted_once_and_persisted() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;

        assert!(aggregator.record_active_user(UserId::new(2)));
        assert!(aggregator.record_active_user(UserId::new(1)));
        assert!(!aggregator.record_active_user(UserId::new(2)));
        assert_eq!(aggregator.get(MetricId::UniqueActiveUsersToday), 2);

        aggregator.flush(&gateway).await;
        assert_eq!(gateway.text(DAILY_USER_IDS_METRIC).as_deref(), Some("1,2"));

        // A fresh process picks the set back up.
        let (restored, _) = loaded(&gateway).await;
        assert_eq!(restored.daily_user_ids(), vec![UserId::new(1), UserId::new(2)]);
        assert!(!restored.record_active_user(UserId::new(1)));
    }

    #[tokio::test]
    async fn test_load_skips_malformed_daily_ids() {
        let gateway = InMemoryGateway::new()
            .with_metric("unique_active_users_today", 3)
            .with_text_metric(DAILY_USER_IDS_METRIC, "7, 3,,oops,12");
        let (aggregator, _) = loaded(&gateway).await;

        assert_eq!(
            aggregator.daily_user_ids(),
            vec![UserId::new(3), UserId::new(7), UserId::new(12)]
        );
        assert!(!aggregator.record_active_user(UserId::new(12)));
        assert!(aggregator.record_active_user(UserId::new(5)));
    }

    #[tokio::test]
    async fn test_retain_daily_users() {
        let gateway = InMemoryGateway::new();
        let (aggregator, _) = loaded(&gateway).await;
        for id in 1..=4 {
            aggregator.record_active_user(UserId::new(id));
        }

        let removed = aggregator.retain_daily_users(&[UserId::new(1), UserId::new(3)]);

        assert_eq!(removed, 2);
        assert_eq!(aggregator.get(MetricId::UniqueActiveUsersToday), 2);
        assert_eq!(aggregator.daily_user_ids(), vec![UserId::new(1), UserId::new(3)]);
    }

    #[tokio::test]
    async fn test_decode_skips_garbage() {
        let ids = DailyUsers::decode(" 5, x,,7 ");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&UserId::new(5)) && ids.contains(&UserId::new(7)));
    }

    #[tokio::test]
    async fn test_reset_daily_zeroes_subset_and_stamps() {
        let gateway = InMemoryGateway::new();
        let (aggregator, clock) = loaded(&gateway).await;
        aggregator.increment(MetricId::NewUsersToday, 3);
        aggregator.increment(MetricId::CacheHits, 3);
        aggregator.record_active_user(UserId::new(1));

        clock.advance(Duration::from_secs(60));
        aggregator.reset_daily(&MetricId::DAILY);

        assert_eq!(aggregator.get(MetricId::NewUsersToday), 0);
        assert_eq!(aggregator.get(MetricId::UniqueActiveUsersToday), 0);
        assert_eq!(aggregator.get(MetricId::CacheHits), 3);
        assert!(aggregator.daily_user_ids().is_empty());
        assert_eq!(
            aggregator.timestamp(TimestampId::LastReset),
            from_epoch_secs(to_epoch_secs(clock.wall_now()))
        );
    }

    #[tokio::test]
    async fn test_rollover_only_on_new_day() {
        use chrono::TimeZone;
        let start = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::starting_at(start));
        let gateway = InMemoryGateway::new();
        let aggregator = MetricsAggregator::new(clock.clone());
        aggregator.load(&gateway).await.unwrap();
        aggregator.increment(MetricId::MessagesSentToday, 4);

        clock.advance(Duration::from_secs(30 * 60));
        assert!(!aggregator.rollover_if_new_day());
        assert_eq!(aggregator.get(MetricId::MessagesSentToday), 4);

        clock.advance(Duration::from_secs(60 * 60));
        assert!(aggregator.rollover_if_new_day());
        assert_eq!(aggregator.get(MetricId::MessagesSentToday), 0);
        assert!(!aggregator.rollover_if_new_day());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let gateway = InMemoryGateway::new();
        let (aggregator, clock) = loaded(&gateway).await;
        aggregator.increment(MetricId::SuccessfulResponses, 1);
        aggregator.record_failure(FailureKind::Llm);
        clock.advance(Duration::from_secs(10));

        let snap = aggregator.snapshot();
        assert!(snap.initialized);
        assert!((snap.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(snap.uptime_secs, 10);
        assert_eq!(snap.counter(MetricId::LlmErrors), 1);
    }
}
