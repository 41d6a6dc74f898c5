//! Metric persistence.
//!
//! [`PersistenceGateway`] is the only way the metrics aggregator reaches the
//! store. Every metric is a named 64-bit integer; a name that was never
//! written reads as 0.

use std::sync::atomic::{AtomicU64, Ordering};

use ::async_trait::async_trait;
use dashmap::DashMap;
use relay_core::RelayResult;

/// Async access to the persisted metric table.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Read a metric. Unknown names return 0.
    async fn get_metric(&self, name: &str) -> RelayResult<i64>;

    /// Overwrite a metric.
    async fn set_metric(&self, name: &str, value: i64) -> RelayResult<()>;

    /// Add `delta` to a metric and return the new value.
    async fn increment_metric(&self, name: &str, delta: i64) -> RelayResult<i64>;

    /// Read a text-valued metric. Stores without a text column return `None`.
    async fn get_text_metric(&self, _name: &str) -> RelayResult<Option<String>> {
        Ok(None)
    }

    /// Write a text-valued metric. Stores without a text column ignore it.
    async fn set_text_metric(&self, _name: &str, _value: &str) -> RelayResult<()> {
        Ok(())
    }
}

/// Gateway backed by process memory.
///
/// Used in tests and when the bot runs without a database.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    values: DashMap<String, i64>,
    texts: DashMap<String, String>,
    writes: AtomicU64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a metric value.
    pub fn with_metric(self, name: impl Into<String>, value: i64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Seed a text metric value.
    pub fn with_text_metric(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.texts.insert(name.into(), value.into());
        self
    }

    /// Current stored value, 0 when absent.
    pub fn value(&self, name: &str) -> i64 {
        self.values.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.texts.get(name).map(|v| v.clone())
    }

    /// Number of `set_metric` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn get_metric(&self, name: &str) -> RelayResult<i64> {
        Ok(self.value(name))
    }

    async fn set_metric(&self, name: &str, value: i64) -> RelayResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    async fn increment_metric(&self, name: &str, delta: i64) -> RelayResult<i64> {
        let mut entry = self.values.entry(name.to_string()).or_insert(0);
        let next = entry.saturating_add(delta);
        *entry = next;
        Ok(next)
    }

    async fn get_text_metric(&self, name: &str) -> RelayResult<Option<String>> {
        Ok(self.text(name))
    }

    async fn set_text_metric(&self, name: &str, value: &str) -> RelayResult<()> {
        self.texts.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
