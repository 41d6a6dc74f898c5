//! Shared application state.
//!
//! Everything the cache-and-metrics layer needs is built once here and handed
//! to handlers as cheap `Arc` clones. There are no process-wide singletons:
//! tests build as many independent states as they like.

use std::sync::Arc;
use std::time::Instant;

use relay_core::{Clock, HealthCheck};
use relay_storage::{PersistenceGateway, UserSessionCache, UserStore};

use crate::config::BotConfig;
use crate::error::BotResult;
use crate::jobs::FlushScheduler;
use crate::middleware::RequestInterceptor;
use crate::services::UserService;
use crate::telemetry::{render_prometheus, FlushReport, MetricsAggregator, MetricsHandle, MetricsSnapshot};

/// Application-wide state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: BotConfig,
    pub clock: Arc<dyn Clock>,
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Session cache in front of `users`.
    pub cache: Arc<UserSessionCache>,
    pub aggregator: Arc<MetricsAggregator>,
    /// Safe-call wrapper handed to everything that records metrics.
    pub metrics: MetricsHandle,
    pub interceptor: RequestInterceptor,
    pub users: Arc<UserService>,
    pub scheduler: Arc<FlushScheduler>,
    pub start_time: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the layer together. Nothing runs until [`Self::start`].
    pub fn new(
        config: BotConfig,
        gateway: Arc<dyn PersistenceGateway>,
        store: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(UserSessionCache::new(config.session, clock.clone()));
        let aggregator = Arc::new(MetricsAggregator::new(clock.clone()));
        let metrics = MetricsHandle::new(aggregator.clone());
        let interceptor = RequestInterceptor::new(cache.clone(), metrics.clone());
        let users = Arc::new(UserService::new(
            store,
            cache.clone(),
            metrics.clone(),
            clock.clone(),
            config.free_message_limit,
        ));
        let scheduler = Arc::new(FlushScheduler::new(
            aggregator.clone(),
            gateway.clone(),
            cache.clone(),
            clock.clone(),
            config.flush.daily_reset,
        ));
        let start_time = clock.now();

        Self {
            config,
            clock,
            gateway,
            cache,
            aggregator,
            metrics,
            interceptor,
            users,
            scheduler,
            start_time,
        }
    }

    /// Load persisted metrics and start the flush task.
    ///
    /// A failed load is logged, not returned: the bot keeps serving, metric
    /// recording stays a no-op, and every scheduler tick retries the load.
    pub async fn start(&self) -> BotResult<()> {
        self.config.validate()?;

        if let Err(e) = self.aggregator.load(self.gateway.as_ref()).await {
            tracing::error!(error = %e, "Failed to load metrics; recording disabled until a retry succeeds");
        }

        self.scheduler.start(self.config.flush.interval).await;
        tracing::info!(
            session_ttl_secs = self.config.session.ttl.as_secs(),
            session_capacity = self.config.session.capacity,
            flush_interval_secs = self.config.flush.interval.as_secs(),
            "Relay layer started"
        );
        Ok(())
    }

    /// Stop the flush task and persist what is left.
    pub async fn shutdown(&self) -> Option<FlushReport> {
        let report = self.scheduler.stop().await;
        if let Some(report) = &report {
            tracing::info!(
                flushed = report.flushed,
                failed = report.failures.len(),
                "Relay layer stopped"
            );
        }
        report
    }

    /// Metrics snapshot with session cache stats attached.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.aggregator
            .snapshot()
            .with_cache_stats(self.cache.stats())
    }

    /// Snapshot in Prometheus text format.
    pub fn render_metrics(&self) -> BotResult<String> {
        render_prometheus(&self.snapshot())
    }

    /// Health of each component.
    pub fn health(&self) -> Vec<HealthCheck> {
        let uptime = self.clock.now().saturating_duration_since(self.start_time);
        let stats = self.cache.stats();
        let cache = HealthCheck::healthy("session_cache")
            .with_detail("entries", serde_json::json!(stats.entry_count))
            .with_detail("capacity", serde_json::json!(stats.capacity))
            .with_detail("hit_rate", serde_json::json!(stats.hit_rate()));
        let scheduler = self.scheduler.metrics();
        let flush = HealthCheck::healthy("flush_scheduler")
            .with_detail("ticks", serde_json::json!(scheduler.ticks))
            .with_detail("uptime_secs", serde_json::json!(uptime.as_secs()));
        vec![self.aggregator.health(), cache, flush]
    }
}
