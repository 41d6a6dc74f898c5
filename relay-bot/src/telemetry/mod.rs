//! Relay Telemetry - Metrics and Logging
//!
//! Persistent bot metrics (aggregated in memory, flushed by the background
//! scheduler), Prometheus exposition of a snapshot, and tracing setup.

pub mod aggregator;
pub mod export;
pub mod handle;
pub mod metric;
pub mod snapshot;
pub mod tracer;

pub use aggregator::{FlushFailure, FlushReport, MetricsAggregator};
pub use export::render_prometheus;
pub use handle::MetricsHandle;
pub use metric::{FailureKind, MetricCall, MetricId, TimerId, TimestampId, UnknownMetric};
pub use snapshot::MetricsSnapshot;
pub use tracer::{init_tracing, TelemetryConfig};
