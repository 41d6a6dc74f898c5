//! Per-request session lookup.
//!
//! Runs before every handler: looks the sender up in the session cache,
//! records the hit or miss, and leaves the result in [`RequestContext`].
//! Handlers use `cached_user` directly on a hit; on a miss they fill the cache
//! with the token issued here, so a destructive mutation that lands while the
//! handler is still reading the store cannot be undone by the fill.

use std::sync::Arc;

use relay_core::{UserId, UserSnapshot};
use relay_storage::{CacheResult, FillToken, UserSessionCache};

use crate::telemetry::{MetricId, MetricsHandle};

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// State handed to a handler for one inbound update.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    /// Session lookup result. `Miss` until intercepted.
    pub cached_user: CacheResult<UserSnapshot>,
    /// Issued on a miss; pass to the cache when filling.
    pub fill_token: Option<FillToken>,
}

impl RequestContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            cached_user: CacheResult::Miss,
            fill_token: None,
        }
    }

    /// The cached snapshot, or a zero-value one for unknown users.
    pub fn user_or_default(&self) -> UserSnapshot {
        match &self.cached_user {
            CacheResult::Hit(snapshot) => snapshot.clone(),
            CacheResult::Miss => UserSnapshot::empty(self.user_id),
        }
    }
}

// ============================================================================
// INTERCEPTOR
// ============================================================================

/// Injects the cached session into every request.
#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    cache: Arc<UserSessionCache>,
    metrics: MetricsHandle,
}

impl RequestInterceptor {
    pub fn new(cache: Arc<UserSessionCache>, metrics: MetricsHandle) -> Self {
        Self { cache, metrics }
    }

    /// Fill `ctx.cached_user` and count the lookup.
    pub fn intercept(&self, ctx: &mut RequestContext) {
        ctx.cached_user = self.cache.get(ctx.user_id);
        match ctx.cached_user {
            CacheResult::Hit(_) => {
                ctx.fill_token = None;
                self.metrics.increment(MetricId::CacheHits);
            }
            CacheResult::Miss => {
                ctx.fill_token = Some(self.cache.begin_fill(ctx.user_id));
                self.metrics.increment(MetricId::CacheMisses);
            }
        }
    }

    /// Build and intercept a context in one step.
    pub fn context_for(&self, user_id: UserId) -> RequestContext {
        let mut ctx = RequestContext::new(user_id);
        self.intercept(&mut ctx);
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MetricsAggregator;
    use relay_storage::{InMemoryGateway, SessionCacheConfig};
    use relay_test_utils::ManualClock;

    async fn setup() -> (RequestInterceptor, Arc<UserSessionCache>, Arc<MetricsAggregator>) {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(UserSessionCache::new(SessionCacheConfig::default(), clock.clone()));
        let aggregator = Arc::new(MetricsAggregator::new(clock));
        aggregator.load(&InMemoryGateway::new()).await.unwrap();
        let interceptor =
            RequestInterceptor::new(cache.clone(), MetricsHandle::new(aggregator.clone()));
        (interceptor, cache, aggregator)
    }

    #[tokio::test]
    async fn test_miss_issues_token_and_counts() {
        let (interceptor, _, aggregator) = setup().await;

        let ctx = interceptor.context_for(UserId::new(5));

        assert!(ctx.cached_user.is_miss());
        assert!(ctx.fill_token.is_some());
        assert_eq!(ctx.user_or_default(), UserSnapshot::empty(UserId::new(5)));
        assert_eq!(aggregator.get(MetricId::CacheMisses), 1);
    }

    #[tokio::test]
    async fn test_hit_injects_snapshot() {
        let (interceptor, cache, aggregator) = setup().await;
        let mut snap = UserSnapshot::empty(UserId::new(5));
        snap.consent_given = true;
        cache.set(snap.clone());

        let ctx = interceptor.context_for(UserId::new(5));

        assert_eq!(ctx.cached_user, CacheResult::Hit(snap));
        assert!(ctx.fill_token.is_none());
        assert_eq!(aggregator.get(MetricId::CacheHits), 1);
        assert_eq!(aggregator.get(MetricId::CacheMisses), 0);
    }

    #[test]
    fn test_intercept_without_metrics() {
        let cache = Arc::new(UserSessionCache::new(
            SessionCacheConfig::default(),
            Arc::new(ManualClock::new()),
        ));
        let interceptor = RequestInterceptor::new(cache, MetricsHandle::unset());
        let ctx = interceptor.context_for(UserId::new(1));
        assert!(ctx.cached_user.is_miss());
    }
}
