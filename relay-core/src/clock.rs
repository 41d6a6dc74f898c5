//! Time sources.
//!
//! Cache expiry runs on the monotonic clock; metric timestamps (`started_at`,
//! `last_reset`) run on the wall clock. Both come from the same [`Clock`] so a
//! test can move them forward together without sleeping.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::Timestamp;

/// Source of "now".
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for TTL and recency.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for persisted timestamps.
    fn wall_now(&self) -> Timestamp;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_wall: Timestamp,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Start at the current real time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start with the wall clock pinned to `wall`.
    pub fn starting_at(wall: Timestamp) -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall: wall,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn wall_now(&self) -> Timestamp {
        // Offsets never exceed chrono's range in practice; saturate just in case.
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or(chrono::Duration::MAX);
        self.base_wall + offset
    }
}
