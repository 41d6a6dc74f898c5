//! Prometheus exposition of a [`MetricsSnapshot`].
//!
//! Each render builds a private registry from the snapshot, so rendering never
//! touches the live aggregator and two renders never share state.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use super::metric::MetricId;
use super::snapshot::MetricsSnapshot;
use crate::constants::PROMETHEUS_NAMESPACE;
use crate::error::{BotError, BotResult};

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(PROMETHEUS_NAMESPACE)
}

fn register_int_gauge(registry: &Registry, name: &str, help: &str, value: u64) -> BotResult<()> {
    let gauge = IntGauge::with_opts(opts(name, help))?;
    gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
    registry.register(Box::new(gauge))?;
    Ok(())
}

fn register_gauge(registry: &Registry, name: &str, help: &str, value: f64) -> BotResult<()> {
    let gauge = Gauge::with_opts(opts(name, help))?;
    gauge.set(value);
    registry.register(Box::new(gauge))?;
    Ok(())
}

/// Encode `snapshot` in the Prometheus text format.
///
/// Lifetime counters are exported as counters; daily counters reset at
/// midnight and are exported as gauges.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> BotResult<String> {
    let registry = Registry::new();

    for id in MetricId::ALL {
        let value = snapshot.counter(id);
        if id.is_daily() {
            register_int_gauge(&registry, id.name(), "Daily bot counter", value)?;
        } else {
            let counter = IntCounter::with_opts(opts(
                &format!("{}_total", id.name()),
                "Lifetime bot counter",
            ))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }
    }

    register_int_gauge(
        &registry,
        "daily_active_users",
        "Distinct users seen since the last daily reset",
        snapshot.daily_user_count as u64,
    )?;
    register_gauge(
        &registry,
        "success_rate_percent",
        "Successful responses as a percentage of all responses",
        snapshot.success_rate,
    )?;
    register_gauge(
        &registry,
        "cache_hit_rate_percent",
        "Session cache hits as a percentage of lookups",
        snapshot.cache_hit_rate,
    )?;
    register_gauge(
        &registry,
        "response_time_avg_ms",
        "Mean response time in milliseconds",
        snapshot.avg_response_time_ms,
    )?;
    register_int_gauge(
        &registry,
        "uptime_seconds",
        "Seconds since started_at",
        snapshot.uptime_secs,
    )?;

    if let Some(cache) = &snapshot.cache {
        register_int_gauge(
            &registry,
            "session_cache_entries",
            "Users currently cached",
            cache.entry_count,
        )?;
        register_int_gauge(
            &registry,
            "session_cache_capacity",
            "Configured session cache capacity",
            cache.capacity,
        )?;
        register_int_gauge(
            &registry,
            "session_cache_evictions",
            "Entries evicted to make room",
            cache.evictions,
        )?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode metrics");
        BotError::Telemetry(format!("Failed to encode metrics: {}", e))
    })
}
