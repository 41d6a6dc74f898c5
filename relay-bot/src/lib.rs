//! Relay Bot - Cache and Metrics Layer
//!
//! The in-process layer that sits between the chat transport and the user
//! store: a per-request session interceptor, cache-aware user services, a
//! persistent metrics aggregator and the background task that flushes it.
//!
//! Everything is owned by [`AppState`]; there is no global state.

pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::BotConfig;
pub use error::{BotError, BotResult};
pub use jobs::{FlushConfig, FlushScheduler, FlushSnapshot};
pub use middleware::{RequestContext, RequestInterceptor};
pub use services::{CommandOutcome, UserService};
pub use state::AppState;
pub use telemetry::{
    init_tracing, render_prometheus, FailureKind, FlushReport, MetricId, MetricsAggregator,
    MetricsHandle, MetricsSnapshot, TelemetryConfig, TimerId,
};
