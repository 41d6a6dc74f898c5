//! Tracing subscriber initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::DEFAULT_LOG_FILTER;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json_logs: bool,
    /// Service name attached to the startup log line.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
            service_name: "relay-bot".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create TelemetryConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RELAY_LOG_FILTER`: Filter directive (default: `relay_bot=info,relay_storage=info,warn`)
    /// - `RELAY_LOG_JSON`: "true" or "1" for JSON output (default: false)
    /// - `RELAY_SERVICE_NAME`: Service name (default: relay-bot)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_filter: std::env::var("RELAY_LOG_FILTER").unwrap_or(defaults.log_filter),
            json_logs: std::env::var("RELAY_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.json_logs),
            service_name: std::env::var("RELAY_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_filter`. Returns false when a subscriber
/// was already installed, so calling this twice is harmless.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
    .is_ok();

    if installed {
        tracing::info!(
            service_name = config.service_name,
            json_logs = config.json_logs,
            "Tracing initialized"
        );
    }
    installed
}
