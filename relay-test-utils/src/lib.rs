//! Relay Test Utilities
//!
//! Shared test infrastructure for the relay workspace:
//! - A manual clock for TTL and daily-reset tests
//! - A persistence gateway with switchable failures
//! - A user store that yields inside every mutation
//! - Fixtures for common user records
//! - Proptest generators for user types

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;

// Re-export core types for convenience
pub use relay_core::{
    Clock, GenderPreference, ManualClock, RelayResult, StorageError, SubscriptionStatus,
    SystemClock, Timestamp, UserId, UserSnapshot, UserUpdate,
};
pub use relay_storage::{InMemoryGateway, InMemoryUserStore, PersistenceGateway, UserStore};

// ============================================================================
// FAILING GATEWAY
// ============================================================================

/// In-memory gateway whose reads and writes can be made to fail.
///
/// Reads fail all at once; writes fail per metric name so a test can check
/// that one bad record does not hold back the others.
#[derive(Debug, Default)]
pub struct FailingGateway {
    inner: InMemoryGateway,
    fail_reads: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
}

impl FailingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a pre-seeded gateway.
    pub fn wrapping(inner: InMemoryGateway) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Make every read fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes to `name` fail until [`Self::heal`].
    pub fn fail_writes_for(&self, name: &str) {
        self.writes().insert(name.to_string());
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        self.fail_reads(false);
        self.writes().clear();
    }

    /// The backing store, for inspecting what was persisted.
    pub fn inner(&self) -> &InMemoryGateway {
        &self.inner
    }

    fn writes(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failing_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(&self, name: &str) -> RelayResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: format!("injected read failure for {}", name),
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self, name: &str) -> RelayResult<()> {
        if self.writes().contains(name) {
            return Err(StorageError::query("set_metric", format!("injected write failure for {}", name)).into());
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for FailingGateway {
    async fn get_metric(&self, name: &str) -> RelayResult<i64> {
        self.check_read(name)?;
        self.inner.get_metric(name).await
    }

    async fn set_metric(&self, name: &str, value: i64) -> RelayResult<()> {
        self.check_write(name)?;
        self.inner.set_metric(name, value).await
    }

    async fn increment_metric(&self, name: &str, delta: i64) -> RelayResult<i64> {
        self.check_write(name)?;
        self.inner.increment_metric(name, delta).await
    }

    async fn get_text_metric(&self, name: &str) -> RelayResult<Option<String>> {
        self.check_read(name)?;
        self.inner.get_text_metric(name).await
    }

    async fn set_text_metric(&self, name: &str, value: &str) -> RelayResult<()> {
        self.check_write(name)?;
        self.inner.set_text_metric(name, value).await
    }
}

// ============================================================================
// YIELDING USER STORE
// ============================================================================

/// In-memory user store that yields to the scheduler before every mutation.
///
/// A real database suspends the caller on each write; this store does the
/// same so concurrent command tests actually interleave.
#[derive(Debug, Default)]
pub struct YieldingUserStore {
    inner: InMemoryUserStore,
}

impl YieldingUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store, for seeding and inspection.
    pub fn inner(&self) -> &InMemoryUserStore {
        &self.inner
    }
}

#[async_trait]
impl UserStore for YieldingUserStore {
    async fn fetch_user(&self, user_id: UserId) -> RelayResult<Option<UserSnapshot>> {
        self.inner.fetch_user(user_id).await
    }

    async fn upsert_user(&self, snapshot: &UserSnapshot) -> RelayResult<bool> {
        tokio::task::yield_now().await;
        self.inner.upsert_user(snapshot).await
    }

    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> RelayResult<()> {
        tokio::task::yield_now().await;
        self.inner.update_user(user_id, update).await
    }

    async fn delete_messages(&self, user_id: UserId) -> RelayResult<u64> {
        tokio::task::yield_now().await;
        self.inner.delete_messages(user_id).await
    }

    async fn delete_user(&self, user_id: UserId) -> RelayResult<bool> {
        tokio::task::yield_now().await;
        self.inner.delete_user(user_id).await
    }

    async fn daily_message_count(&self, user_id: UserId, day: NaiveDate) -> RelayResult<u32> {
        self.inner.daily_message_count(user_id, day).await
    }

    async fn increment_daily_message_count(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RelayResult<u32> {
        tokio::task::yield_now().await;
        self.inner.increment_daily_message_count(user_id, day).await
    }

    async fn list_user_ids(&self) -> RelayResult<Vec<UserId>> {
        self.inner.list_user_ids().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for relay user types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a positive UserId, as the chat platform issues them.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1i64..=i64::MAX).prop_map(UserId::new)
    }

    /// Generate a UserId from a small pool, so collisions happen.
    pub fn arb_small_user_id() -> impl Strategy<Value = UserId> {
        (1i64..32).prop_map(UserId::new)
    }

    /// Generate a Timestamp (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    pub fn arb_gender_preference() -> impl Strategy<Value = GenderPreference> {
        prop_oneof![Just(GenderPreference::Female), Just(GenderPreference::Male)]
    }

    pub fn arb_subscription_status() -> impl Strategy<Value = SubscriptionStatus> {
        prop_oneof![Just(SubscriptionStatus::Free), Just(SubscriptionStatus::Premium)]
    }

    /// Generate a UserSnapshot with arbitrary flags and profile fields.
    pub fn arb_user_snapshot() -> impl Strategy<Value = UserSnapshot> {
        (
            arb_user_id(),
            proptest::option::of("[a-z][a-z0-9_]{2,15}"),
            any::<bool>(),
            arb_gender_preference(),
            arb_subscription_status(),
            proptest::option::of(arb_timestamp()),
            0u32..100,
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(
                |(
                    user_id,
                    username,
                    consent_given,
                    gender_preference,
                    subscription_status,
                    subscription_expires_at,
                    daily_message_count,
                    is_restarted,
                    is_stopped,
                )| UserSnapshot {
                    user_id,
                    username,
                    first_name: None,
                    last_name: None,
                    consent_given,
                    gender_preference,
                    subscription_status,
                    subscription_expires_at,
                    daily_message_count,
                    is_restarted,
                    is_stopped,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common scenarios.

    use super::*;

    /// A free user with a username and no consent yet.
    pub fn user(id: i64) -> UserSnapshot {
        UserSnapshot {
            username: Some(format!("user{}", id)),
            first_name: Some("Test".to_string()),
            ..UserSnapshot::empty(UserId::new(id))
        }
    }

    /// A premium user whose subscription runs until `expires_at`.
    pub fn premium_user(id: i64, expires_at: Timestamp) -> UserSnapshot {
        UserSnapshot {
            consent_given: true,
            subscription_status: SubscriptionStatus::Premium,
            subscription_expires_at: Some(expires_at),
            ..user(id)
        }
    }

    /// A manual clock pinned just before midnight UTC on 2026-03-14.
    pub fn clock_before_midnight() -> ManualClock {
        let wall = chrono::DateTime::from_timestamp(1_773_532_740, 0).unwrap_or_else(chrono::Utc::now);
        ManualClock::starting_at(wall)
    }
}

// ============================================================================
// TESTS
// ============================================================================
