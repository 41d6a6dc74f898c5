//! Cache-aware user operations.
//!
//! Reads go to the session cache first and fill it on a miss. Writes follow
//! one of three shapes, chosen by what the store mutation does:
//!
//! - field writes: store first, then [`UserSessionCache::commit_fields`];
//! - restart / stop: flags claimed in the cache first, then the store,
//!   through [`UserSessionCache::claim`] and [`UserSessionCache::mark_then`];
//! - deletion: through [`UserSessionCache::invalidate_then`].
//!
//! Daily quota checks always read the store.

use std::sync::Arc;

use chrono::NaiveDate;
use relay_core::{
    Clock, GenderPreference, SubscriptionStatus, Timestamp, UserField, UserId, UserSnapshot,
    UserUpdate,
};
use relay_storage::{CacheResult, FillToken, UserSessionCache, UserStore};

use crate::error::BotResult;
use crate::middleware::RequestContext;
use crate::telemetry::{FailureKind, MetricId, MetricsHandle};

/// Result of a one-shot command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// The cached session says the command already ran.
    AlreadyApplied,
}

/// User business logic with session caching.
pub struct UserService {
    store: Arc<dyn UserStore>,
    cache: Arc<UserSessionCache>,
    metrics: MetricsHandle,
    clock: Arc<dyn Clock>,
    free_message_limit: u32,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService")
            .field("free_message_limit", &self.free_message_limit)
            .finish_non_exhaustive()
    }
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<UserSessionCache>,
        metrics: MetricsHandle,
        clock: Arc<dyn Clock>,
        free_message_limit: u32,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
            clock,
            free_message_limit,
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock.wall_now().date_naive()
    }

    /// Count a store failure before handing it back.
    fn track<T>(&self, result: relay_core::RelayResult<T>) -> BotResult<T> {
        if result.is_err() {
            self.metrics.record_failure(FailureKind::Database);
        }
        Ok(result?)
    }

    async fn fetch_and_fill(
        &self,
        user_id: UserId,
        token: FillToken,
    ) -> BotResult<Option<UserSnapshot>> {
        let fetched = self.track(self.store.fetch_user(user_id).await)?;
        if let Some(snapshot) = &fetched {
            self.cache.fill(token, snapshot.clone());
        }
        Ok(fetched)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// The user's snapshot from the cache, or from the store on a miss.
    pub async fn get_user_cached(&self, user_id: UserId) -> BotResult<Option<UserSnapshot>> {
        if let CacheResult::Hit(snapshot) = self.cache.get(user_id) {
            return Ok(Some(snapshot));
        }
        let token = self.cache.begin_fill(user_id);
        self.fetch_and_fill(user_id, token).await
    }

    /// Like [`Self::get_user_cached`], reusing the interceptor's lookup.
    pub async fn resolve(&self, ctx: &RequestContext) -> BotResult<Option<UserSnapshot>> {
        match (&ctx.cached_user, ctx.fill_token) {
            (CacheResult::Hit(snapshot), _) => Ok(Some(snapshot.clone())),
            (CacheResult::Miss, Some(token)) => self.fetch_and_fill(ctx.user_id, token).await,
            (CacheResult::Miss, None) => self.get_user_cached(ctx.user_id).await,
        }
    }

    pub async fn consent_given(&self, user_id: UserId) -> BotResult<bool> {
        Ok(self
            .get_user_cached(user_id)
            .await?
            .is_some_and(|u| u.consent_given))
    }

    pub async fn gender_preference(&self, user_id: UserId) -> BotResult<GenderPreference> {
        Ok(self
            .get_user_cached(user_id)
            .await?
            .map(|u| u.gender_preference)
            .unwrap_or_default())
    }

    pub async fn subscription(
        &self,
        user_id: UserId,
    ) -> BotResult<(SubscriptionStatus, Option<Timestamp>)> {
        Ok(self
            .get_user_cached(user_id)
            .await?
            .map(|u| (u.subscription_status, u.subscription_expires_at))
            .unwrap_or_default())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Create the user or refresh its profile. Returns true when created.
    pub async fn register_user(&self, profile: &UserSnapshot) -> BotResult<bool> {
        let created = self.track(self.store.upsert_user(profile).await)?;
        self.cache.commit_fields(
            profile.user_id,
            vec![
                UserField::Username(profile.username.clone()),
                UserField::FirstName(profile.first_name.clone()),
                UserField::LastName(profile.last_name.clone()),
            ],
        );
        if created {
            self.metrics.increment(MetricId::NewUsersToday);
            tracing::info!(user_id = %profile.user_id, "New user registered");
        }
        Ok(created)
    }

    pub async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> BotResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.track(self.store.update_user(user_id, update).await)?;
        self.cache.commit_fields(user_id, update.fields());
        Ok(())
    }

    pub async fn set_consent(&self, user_id: UserId, consent: bool) -> BotResult<()> {
        let update = UserUpdate {
            consent_given: Some(consent),
            ..Default::default()
        };
        self.update_user(user_id, &update).await
    }

    pub async fn set_gender_preference(
        &self,
        user_id: UserId,
        preference: GenderPreference,
    ) -> BotResult<()> {
        let update = UserUpdate {
            gender_preference: Some(preference),
            ..Default::default()
        };
        self.update_user(user_id, &update).await
    }

    pub async fn set_subscription(
        &self,
        user_id: UserId,
        status: SubscriptionStatus,
        expires_at: Option<Timestamp>,
    ) -> BotResult<()> {
        let update = UserUpdate {
            subscription_status: Some(status),
            subscription_expires_at: expires_at,
            ..Default::default()
        };
        self.update_user(user_id, &update).await
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Clear the conversation and mark the session restarted.
    ///
    /// One-shot per cached session: the flags are claimed in the cache before
    /// the messages are deleted, so a second restart while `is_restarted` is
    /// cached is refused even when the first is still running.
    pub async fn restart_user(&self, user_id: UserId) -> BotResult<CommandOutcome> {
        let fields = vec![UserField::IsRestarted(true), UserField::IsStopped(false)];
        if !self.cache.claim(user_id, |u| u.is_restarted, &fields) {
            return Ok(CommandOutcome::AlreadyApplied);
        }
        let store = Arc::clone(&self.store);
        let result = self
            .cache
            .mark_then(user_id, fields, || async move {
                store.delete_messages(user_id).await
            })
            .await;
        if result.is_err() {
            // Release the claim so the user can retry.
            self.cache.invalidate(user_id);
        }
        let removed = self.track(result)?;
        self.metrics.increment(MetricId::CommandsUsedToday);
        tracing::info!(user_id = %user_id, removed, "User restarted");
        Ok(CommandOutcome::Applied)
    }

    /// Mark the session stopped, then wipe the user's messages, consent and
    /// persona choice.
    pub async fn stop_user(&self, user_id: UserId) -> BotResult<CommandOutcome> {
        let fields = vec![
            UserField::IsStopped(true),
            UserField::IsRestarted(false),
            UserField::ConsentGiven(false),
            UserField::GenderPreference(GenderPreference::Female),
        ];
        if !self.cache.claim(user_id, |u| u.is_stopped, &fields) {
            return Ok(CommandOutcome::AlreadyApplied);
        }
        let reset = UserUpdate {
            consent_given: Some(false),
            gender_preference: Some(GenderPreference::Female),
            ..Default::default()
        };
        let store = Arc::clone(&self.store);
        let result = self
            .cache
            .mark_then(user_id, fields, || async move {
                store.delete_messages(user_id).await?;
                store.update_user(user_id, &reset).await
            })
            .await;
        self.track(result)?;
        self.metrics.increment(MetricId::CommandsUsedToday);
        tracing::info!(user_id = %user_id, "User stopped");
        Ok(CommandOutcome::Applied)
    }

    /// Remove the user entirely. Returns whether the user existed.
    pub async fn delete_user(&self, user_id: UserId) -> BotResult<bool> {
        let store = Arc::clone(&self.store);
        let result = self
            .cache
            .invalidate_then(user_id, || async move { store.delete_user(user_id).await })
            .await;
        let existed = self.track(result)?;
        tracing::info!(user_id = %user_id, existed, "User deleted");
        Ok(existed)
    }

    // ========================================================================
    // QUOTA
    // ========================================================================

    /// Whether the user may send another message today.
    ///
    /// Premium users are unlimited. Everyone else is checked against today's
    /// count in the store, never the cached one.
    pub async fn can_send_message(&self, user_id: UserId) -> BotResult<bool> {
        if let Some(user) = self.get_user_cached(user_id).await? {
            if user.has_active_subscription(self.clock.wall_now()) {
                return Ok(true);
            }
        }
        let sent = self.track(self.store.daily_message_count(user_id, self.today()).await)?;
        let allowed = sent < self.free_message_limit;
        if !allowed {
            self.metrics.increment(MetricId::LimitExceededCount);
        }
        Ok(allowed)
    }

    /// Messages left today for a free user.
    pub async fn remaining_messages(&self, user_id: UserId) -> BotResult<u32> {
        let sent = self.track(self.store.daily_message_count(user_id, self.today()).await)?;
        Ok(self.free_message_limit.saturating_sub(sent))
    }

    /// Count a message the user sent. Returns today's new total.
    pub async fn record_message_sent(&self, user_id: UserId) -> BotResult<u32> {
        let count = self.track(
            self.store
                .increment_daily_message_count(user_id, self.today())
                .await,
        )?;
        self.metrics.increment(MetricId::MessagesSentToday);
        self.metrics.record_active_user(user_id);
        Ok(count)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Drop ids from today's active set that no longer exist in the store.
    pub async fn clean_daily_users(&self) -> BotResult<usize> {
        let Some(aggregator) = self.metrics.aggregator() else {
            return Ok(0);
        };
        let existing = self.track(self.store.list_user_ids().await)?;
        Ok(aggregator.retain_daily_users(&existing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MetricsAggregator;
    use relay_storage::{InMemoryGateway, InMemoryUserStore, SessionCacheConfig};
    use relay_test_utils::{fixtures, ManualClock, YieldingUserStore};
    use std::future::Future;
    use std::pin::Pin;
    use std::task::Poll;
    use std::time::Duration;

    struct Fixture {
        service: UserService,
        store: Arc<InMemoryUserStore>,
        cache: Arc<UserSessionCache>,
        aggregator: Arc<MetricsAggregator>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(InMemoryUserStore::new());
        let cache = Arc::new(UserSessionCache::new(SessionCacheConfig::default(), clock.clone()));
        let aggregator = Arc::new(MetricsAggregator::new(clock.clone()));
        aggregator.load(&InMemoryGateway::new()).await.unwrap();
        let service = UserService::new(
            store.clone(),
            cache.clone(),
            MetricsHandle::new(aggregator.clone()),
            clock.clone(),
            3,
        );
        Fixture {
            service,
            store,
            cache,
            aggregator,
            clock,
        }
    }

    #[tokio::test]
    async fn test_get_user_cached_fills_on_miss() {
        let f = fixture().await;
        f.store.upsert_user(&fixtures::user(1)).await.unwrap();

        let user = f.service.get_user_cached(UserId::new(1)).await.unwrap();
        assert!(user.is_some());
        assert!(f.cache.get(UserId::new(1)).is_hit());

        // Served from cache even after the store row disappears behind our back.
        f.store.delete_user(UserId::new(1)).await.unwrap();
        assert!(f.service.get_user_cached(UserId::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_cached() {
        let f = fixture().await;
        assert_eq!(f.service.get_user_cached(UserId::new(9)).await.unwrap(), None);
        assert!(f.cache.is_empty());
        assert!(!f.service.consent_given(UserId::new(9)).await.unwrap());
        assert_eq!(
            f.service.gender_preference(UserId::new(9)).await.unwrap(),
            GenderPreference::Female
        );
    }

    #[tokio::test]
    async fn test_register_counts_new_users_once() {
        let f = fixture().await;
        assert!(f.service.register_user(&fixtures::user(1)).await.unwrap());
        assert!(!f.service.register_user(&fixtures::user(1)).await.unwrap());
        assert_eq!(f.aggregator.get(MetricId::NewUsersToday), 1);
    }

    #[tokio::test]
    async fn test_set_consent_updates_store_and_cache() {
        let f = fixture().await;
        f.service.register_user(&fixtures::user(1)).await.unwrap();
        f.service.get_user_cached(UserId::new(1)).await.unwrap();

        f.service.set_consent(UserId::new(1), true).await.unwrap();

        let cached = f.cache.get(UserId::new(1)).into_option().unwrap();
        assert!(cached.consent_given);
        let stored = f.store.fetch_user(UserId::new(1)).await.unwrap().unwrap();
        assert!(stored.consent_given);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let f = fixture().await;
        // Not in the store: update fails with NotFound.
        f.cache.set(fixtures::user(1));

        let err = f.service.set_consent(UserId::new(1), true).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!f.cache.get(UserId::new(1)).into_option().unwrap().consent_given);
        assert_eq!(f.aggregator.get(MetricId::DatabaseErrors), 1);
    }

    #[tokio::test]
    async fn test_restart_is_one_shot() {
        let f = fixture().await;
        f.service.register_user(&fixtures::user(1)).await.unwrap();
        f.service.get_user_cached(UserId::new(1)).await.unwrap();
        f.store.add_messages(UserId::new(1), 5).await;

        assert_eq!(
            f.service.restart_user(UserId::new(1)).await.unwrap(),
            CommandOutcome::Applied
        );
        assert_eq!(f.store.message_count(UserId::new(1)).await, 0);
        assert_eq!(
            f.service.restart_user(UserId::new(1)).await.unwrap(),
            CommandOutcome::AlreadyApplied
        );
    }

    fn yielding_service(aggregator: Arc<MetricsAggregator>) -> (UserService, Arc<YieldingUserStore>) {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(YieldingUserStore::new());
        let cache = Arc::new(UserSessionCache::new(SessionCacheConfig::default(), clock.clone()));
        let service = UserService::new(
            store.clone(),
            cache,
            MetricsHandle::new(aggregator),
            clock,
            3,
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_concurrent_restarts_apply_once() {
        let f = fixture().await;
        let (service, store) = yielding_service(f.aggregator.clone());
        let id = UserId::new(1);
        service.register_user(&fixtures::user(1)).await.unwrap();
        service.get_user_cached(id).await.unwrap();
        store.inner().add_messages(id, 5).await;

        let (first, second) = tokio::join!(service.restart_user(id), service.restart_user(id));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o == CommandOutcome::AlreadyApplied);

        assert_eq!(outcomes, vec![CommandOutcome::Applied, CommandOutcome::AlreadyApplied]);
        assert_eq!(f.aggregator.get(MetricId::CommandsUsedToday), 1);
        assert_eq!(store.inner().message_count(id).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_stops_apply_once() {
        let f = fixture().await;
        let (service, _store) = yielding_service(f.aggregator.clone());
        let id = UserId::new(1);
        service.register_user(&fixtures::user(1)).await.unwrap();
        service.get_user_cached(id).await.unwrap();

        let (first, second) = tokio::join!(service.stop_user(id), service.stop_user(id));
        let applied = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|o| **o == CommandOutcome::Applied)
            .count();

        assert_eq!(applied, 1);
        assert_eq!(f.aggregator.get(MetricId::CommandsUsedToday), 1);
    }

    #[tokio::test]
    async fn test_restart_flags_visible_while_deleting() {
        let f = fixture().await;
        let (service, store) = yielding_service(f.aggregator.clone());
        let id = UserId::new(1);
        service.register_user(&fixtures::user(1)).await.unwrap();
        service.get_user_cached(id).await.unwrap();
        store.inner().add_messages(id, 2).await;

        let restart = service.restart_user(id);
        tokio::pin!(restart);
        // First poll stops at the store's yield, inside the delete.
        assert!(poll_once(restart.as_mut()).await.is_none());
        assert!(service.cache.get(id).into_option().unwrap().is_restarted);
        assert_eq!(store.inner().message_count(id).await, 2);

        assert_eq!(restart.await.unwrap(), CommandOutcome::Applied);
        assert_eq!(store.inner().message_count(id).await, 0);
    }

    /// Poll a future once, returning its output if it finished.
    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| match Pin::new(&mut fut).poll(cx) {
            Poll::Ready(out) => Poll::Ready(Some(out)),
            Poll::Pending => Poll::Ready(None),
        })
        .await
    }

    #[tokio::test]
    async fn test_stop_marks_before_reset() {
        let f = fixture().await;
        let mut user = fixtures::user(1);
        user.consent_given = true;
        user.gender_preference = GenderPreference::Male;
        f.store.upsert_user(&user).await.unwrap();
        f.service.get_user_cached(UserId::new(1)).await.unwrap();

        assert_eq!(
            f.service.stop_user(UserId::new(1)).await.unwrap(),
            CommandOutcome::Applied
        );

        let cached = f.cache.get(UserId::new(1)).into_option().unwrap();
        assert!(cached.is_stopped && !cached.is_restarted);
        assert!(!cached.consent_given);
        let stored = f.store.fetch_user(UserId::new(1)).await.unwrap().unwrap();
        assert!(!stored.consent_given);
        assert_eq!(stored.gender_preference, GenderPreference::Female);

        assert_eq!(
            f.service.stop_user(UserId::new(1)).await.unwrap(),
            CommandOutcome::AlreadyApplied
        );
    }

    #[tokio::test]
    async fn test_delete_user_invalidates_cache() {
        let f = fixture().await;
        f.service.register_user(&fixtures::user(1)).await.unwrap();
        f.service.get_user_cached(UserId::new(1)).await.unwrap();

        assert!(f.service.delete_user(UserId::new(1)).await.unwrap());
        assert!(f.cache.get(UserId::new(1)).is_miss());
        assert_eq!(f.service.get_user_cached(UserId::new(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quota_reads_store_not_cache() {
        let f = fixture().await;
        let id = UserId::new(1);
        f.service.register_user(&fixtures::user(1)).await.unwrap();
        f.service.get_user_cached(id).await.unwrap();

        for _ in 0..3 {
            assert!(f.service.can_send_message(id).await.unwrap());
            f.service.record_message_sent(id).await.unwrap();
        }
        assert!(!f.service.can_send_message(id).await.unwrap());
        assert_eq!(f.service.remaining_messages(id).await.unwrap(), 0);
        assert_eq!(f.aggregator.get(MetricId::LimitExceededCount), 1);
        assert_eq!(f.cache.get(id).into_option().unwrap().daily_message_count, 0);

        // A new UTC day starts a fresh count.
        f.clock.advance(Duration::from_secs(24 * 60 * 60));
        assert!(f.service.can_send_message(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_premium_users_are_unlimited() {
        let f = fixture().await;
        let id = UserId::new(1);
        f.store
            .upsert_user(&fixtures::premium_user(1, f.clock.wall_now() + chrono::Duration::days(7)))
            .await
            .unwrap();
        for _ in 0..5 {
            f.service.record_message_sent(id).await.unwrap();
        }
        assert!(f.service.can_send_message(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_daily_users() {
        let f = fixture().await;
        f.service.register_user(&fixtures::user(1)).await.unwrap();
        f.service.record_message_sent(UserId::new(1)).await.unwrap();
        f.service.record_message_sent(UserId::new(2)).await.unwrap();

        assert_eq!(f.service.clean_daily_users().await.unwrap(), 1);
        assert_eq!(f.aggregator.daily_user_ids(), vec![UserId::new(1)]);
    }

    #[tokio::test]
    async fn test_resolve_uses_interceptor_result() {
        let f = fixture().await;
        f.store.upsert_user(&fixtures::user(1)).await.unwrap();
        let mut ctx = RequestContext::new(UserId::new(1));
        ctx.fill_token = Some(f.cache.begin_fill(UserId::new(1)));

        assert!(f.service.resolve(&ctx).await.unwrap().is_some());
        assert!(f.cache.get(UserId::new(1)).is_hit());
    }
}
