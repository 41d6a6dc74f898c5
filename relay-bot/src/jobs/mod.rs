//! Background Jobs for the relay bot
//!
//! - `flush`: Persists dirty metrics, sweeps the session cache and performs
//!   the daily counter reset
//!
//! # Usage
//!
//! The scheduler is owned by [`crate::state::AppState`] and started during
//! bot startup:
//!
//! ```ignore
//! let scheduler = FlushScheduler::new(aggregator, gateway, cache, clock, true);
//! scheduler.start(config.flush.interval).await;
//!
//! // On shutdown; performs a final flush
//! scheduler.stop().await;
//! ```

pub mod flush;

pub use flush::{FlushConfig, FlushMetrics, FlushScheduler, FlushSnapshot};
