//! Relay Core - Shared Types
//!
//! Plain data structures shared by every crate in the workspace: user
//! identity and snapshot types, the error taxonomy, health reporting and the
//! clock abstraction. This crate contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod clock;
pub mod error;
pub mod health;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, MetricsError, RelayError, RelayResult, StorageError, ValidationError,
};
pub use health::{HealthCheck, HealthStatus};
pub use user::{GenderPreference, SubscriptionStatus, UserField, UserSnapshot, UserUpdate};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Wall-clock timestamp in UTC.
pub type Timestamp = DateTime<Utc>;

/// Chat-platform user identifier.
///
/// Transport user ids are 64-bit integers; the newtype keeps them from being
/// mixed up with counters and epoch values, which share the same
/// representation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw transport id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a timestamp to whole epoch seconds.
pub fn to_epoch_secs(ts: Timestamp) -> i64 {
    ts.timestamp()
}

/// Convert epoch seconds back to a timestamp.
///
/// Returns `None` for values chrono cannot represent.
pub fn from_epoch_secs(secs: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_user_id_display_and_roundtrip() {
        let id = UserId::new(424242);
        assert_eq!(id.to_string(), "424242");
        assert_eq!(UserId::from(424242), id);
        assert_eq!(id.get(), 424242);
    }

    #[test]
    fn test_user_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_epoch_conversion() {
        let ts = from_epoch_secs(1_700_000_000).unwrap();
        assert_eq!(to_epoch_secs(ts), 1_700_000_000);
        assert!(from_epoch_secs(i64::MAX).is_none());
    }

    proptest! {
        /// Persisted epoch seconds restore the same instant at second precision.
        #[test]
        fn prop_epoch_secs_restore_same_instant(secs in -62_135_596_800i64..253_402_300_799i64) {
            let ts = from_epoch_secs(secs);
            prop_assert!(ts.is_some());
            prop_assert_eq!(to_epoch_secs(ts.unwrap()), secs);
        }

        /// Ids serialize as the bare transport integer.
        #[test]
        fn prop_user_id_json_is_the_raw_integer(raw in any::<i64>()) {
            let id = UserId::new(raw);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(&json, &raw.to_string());
            prop_assert_eq!(serde_json::from_str::<UserId>(&json).unwrap(), id);
        }
    }
}
