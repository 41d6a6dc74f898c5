//! Metrics Flush Background Task
//!
//! Periodically drains dirty metrics to the persistence gateway and keeps the
//! session cache tidy. Each tick, in order:
//!
//! 1. loads the aggregator if an earlier load failed;
//! 2. flushes every dirty metric;
//! 3. sweeps expired session cache entries;
//! 4. resets the daily counters once the UTC date has moved past `last_reset`.
//!
//! # Configuration
//!
//! ```rust
//! use relay_bot::jobs::FlushConfig;
//! use std::time::Duration;
//!
//! let config = FlushConfig {
//!     interval: Duration::from_secs(300), // Flush every five minutes
//!     daily_reset: true,                  // Roll daily counters at midnight UTC
//! };
//! ```
//!
//! # Lifecycle
//!
//! `Stopped -> Running -> Stopped`. [`FlushScheduler::stop`] signals the task,
//! waits for it (a tick that already started runs to completion), then
//! performs one last flush so nothing recorded before shutdown is lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::Clock;
use relay_storage::{PersistenceGateway, UserSessionCache};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::constants::DEFAULT_FLUSH_INTERVAL_SECS;
use crate::error::BotError;
use crate::telemetry::{FlushReport, MetricsAggregator};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the flush background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushConfig {
    /// Time between ticks (default: 5 minutes)
    pub interval: Duration,

    /// Whether ticks perform the daily counter reset (default: true)
    pub daily_reset: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            daily_reset: true,
        }
    }
}

impl FlushConfig {
    /// Create FlushConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RELAY_FLUSH_INTERVAL_SECS`: Seconds between flushes (default: 300)
    /// - `RELAY_DAILY_RESET_ENABLED`: Whether to reset daily counters (default: true)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("RELAY_FLUSH_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS),
        );

        let daily_reset = std::env::var("RELAY_DAILY_RESET_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            interval,
            daily_reset,
        }
    }

    /// Short interval for local runs.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(10),
            daily_reset: true,
        }
    }

    pub fn production() -> Self {
        Self::default()
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters describing the scheduler itself. Not persisted.
#[derive(Debug, Default)]
pub struct FlushMetrics {
    /// Ticks started since startup
    pub ticks: AtomicU64,

    /// Metric records written
    pub records_flushed: AtomicU64,

    /// Metric records that failed to write
    pub flush_failures: AtomicU64,

    /// Session entries removed by sweeps
    pub entries_swept: AtomicU64,

    /// Daily resets performed
    pub daily_resets: AtomicU64,

    /// Task-level failures (late loads, panics)
    pub task_errors: AtomicU64,
}

impl FlushMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FlushSnapshot {
        FlushSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            entries_swept: self.entries_swept.load(Ordering::Relaxed),
            daily_resets: self.daily_resets.load(Ordering::Relaxed),
            task_errors: self.task_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSnapshot {
    pub ticks: u64,
    pub records_flushed: u64,
    pub flush_failures: u64,
    pub entries_swept: u64,
    pub daily_resets: u64,
    pub task_errors: u64,
}

// ============================================================================
// TICK
// ============================================================================

/// Everything a tick needs, cloned into the spawned task.
#[derive(Clone)]
struct FlushJob {
    aggregator: Arc<MetricsAggregator>,
    gateway: Arc<dyn PersistenceGateway>,
    cache: Arc<UserSessionCache>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FlushMetrics>,
    daily_reset: bool,
}

impl FlushJob {
    async fn tick(&self) {
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);

        if !self.aggregator.is_initialized() {
            if let Err(e) = self.aggregator.load(self.gateway.as_ref()).await {
                tracing::warn!(error = %e, "Metrics still not loaded; retrying next tick");
                self.metrics.task_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        let report = self.aggregator.flush(self.gateway.as_ref()).await;
        self.metrics
            .records_flushed
            .fetch_add(report.flushed as u64, Ordering::Relaxed);
        if !report.is_clean() {
            self.metrics
                .flush_failures
                .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
            tracing::warn!(
                flushed = report.flushed,
                failed = report.failures.len(),
                "Metrics flush incomplete; failed records retry next tick"
            );
        }

        let swept = self.cache.sweep_expired(self.clock.now());
        self.metrics
            .entries_swept
            .fetch_add(swept as u64, Ordering::Relaxed);

        if self.daily_reset && self.aggregator.rollover_if_new_day() {
            self.metrics.daily_resets.fetch_add(1, Ordering::Relaxed);
        }

        if report.flushed > 0 || swept > 0 {
            tracing::debug!(flushed = report.flushed, swept, "Flush tick completed");
        } else {
            tracing::trace!("Flush tick completed with nothing to do");
        }
    }

    async fn run(self, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = period.as_secs(), "Flush scheduler started");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Flush scheduler shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owner of the background flush task.
pub struct FlushScheduler {
    job: FlushJob,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("metrics", &self.job.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl FlushScheduler {
    pub fn new(
        aggregator: Arc<MetricsAggregator>,
        gateway: Arc<dyn PersistenceGateway>,
        cache: Arc<UserSessionCache>,
        clock: Arc<dyn Clock>,
        daily_reset: bool,
    ) -> Self {
        Self {
            job: FlushJob {
                aggregator,
                gateway,
                cache,
                clock,
                metrics: Arc::new(FlushMetrics::new()),
                daily_reset,
            },
            running: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> FlushSnapshot {
        self.job.metrics.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn the task with the given period. No-op if already running.
    ///
    /// The first tick fires one full `interval` after start. A zero interval
    /// is rejected by config validation; here it is clamped to one second.
    pub async fn start(&self, interval: Duration) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::info!("Flush scheduler already running");
            return false;
        }

        let period = interval.max(Duration::from_secs(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.job.clone().run(period, shutdown_rx));
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the task and run a final flush.
    ///
    /// Returns the final flush report, or `None` if the scheduler was not
    /// running.
    pub async fn stop(&self) -> Option<FlushReport> {
        let Some(running) = self.running.lock().await.take() else {
            tracing::info!("Flush scheduler not running");
            return None;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            let err = BotError::from(e);
            tracing::error!(error = %err, "Flush task ended abnormally");
            self.job.metrics.task_errors.fetch_add(1, Ordering::Relaxed);
        }

        let report = self.job.aggregator.flush(self.job.gateway.as_ref()).await;
        self.job
            .metrics
            .records_flushed
            .fetch_add(report.flushed as u64, Ordering::Relaxed);

        let snapshot = self.job.metrics.snapshot();
        tracing::info!(
            ticks = snapshot.ticks,
            records_flushed = snapshot.records_flushed,
            flush_failures = snapshot.flush_failures,
            final_failures = report.failures.len(),
            "Flush scheduler stopped"
        );
        Some(report)
    }

    /// Run one tick on the caller's task.
    pub async fn tick_now(&self) {
        self.job.tick().await;
    }
}
