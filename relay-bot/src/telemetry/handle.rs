//! Guarded access to the aggregator from request handlers.
//!
//! Handlers hold a [`MetricsHandle`] instead of the aggregator itself. Every
//! call through the handle is dropped when the aggregator is missing or not
//! yet loaded, so telemetry wiring racing with early traffic can never fail a
//! request.

use std::sync::Arc;
use std::time::Duration;

use relay_core::UserId;

use super::aggregator::MetricsAggregator;
use super::metric::{FailureKind, MetricCall, MetricId, TimerId};

/// Optional, cloneable reference to the aggregator.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Option<Arc<MetricsAggregator>>,
}

impl MetricsHandle {
    pub fn new(aggregator: Arc<MetricsAggregator>) -> Self {
        Self {
            inner: Some(aggregator),
        }
    }

    /// A handle that drops every call.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn aggregator(&self) -> Option<&Arc<MetricsAggregator>> {
        self.inner.as_ref()
    }

    fn live(&self) -> Option<&MetricsAggregator> {
        self.inner.as_deref().filter(|a| a.is_initialized())
    }

    /// Dispatch `call`. Returns whether it reached a loaded aggregator.
    pub fn safe_call(&self, call: MetricCall) -> bool {
        let Some(aggregator) = self.live() else {
            tracing::trace!(?call, "Dropping metric call: aggregator unavailable");
            return false;
        };
        match call {
            MetricCall::Increment(id, delta) => aggregator.increment(id, delta),
            MetricCall::RecordDuration(id, duration) => aggregator.record_duration(id, duration),
            MetricCall::RecordFailure(kind) => aggregator.record_failure(kind),
            MetricCall::RecordActiveUser(user_id) => {
                aggregator.record_active_user(user_id);
            }
        }
        true
    }

    /// Increment a counter by its persisted name. Unknown names are dropped.
    pub fn increment_by_name(&self, name: &str, delta: u64) -> bool {
        match name.parse::<MetricId>() {
            Ok(id) => self.safe_call(MetricCall::Increment(id, delta)),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping metric call");
                false
            }
        }
    }

    pub fn increment(&self, id: MetricId) -> bool {
        self.safe_call(MetricCall::Increment(id, 1))
    }

    pub fn record_duration(&self, id: TimerId, duration: Duration) -> bool {
        self.safe_call(MetricCall::RecordDuration(id, duration))
    }

    pub fn record_failure(&self, kind: FailureKind) -> bool {
        self.safe_call(MetricCall::RecordFailure(kind))
    }

    pub fn record_active_user(&self, user_id: UserId) -> bool {
        self.safe_call(MetricCall::RecordActiveUser(user_id))
    }
}
