//! Property-Based Tests for the Session Cache
//!
//! Covers the bounded TTL cache contract (expiry without sweeps, LRU
//! eviction, invalidation) and the guarantee that a store read racing a
//! destructive mutation can never repopulate the cache with stale fields.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use relay_bot::{MetricsHandle, RequestInterceptor, UserService};
use relay_core::{Clock, UserId};
use relay_storage::{
    BoundedTtlCache, CacheResult, InMemoryUserStore, SessionCacheConfig, UserSessionCache,
    UserStore,
};
use relay_test_utils::{fixtures, generators, ManualClock};

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const TTL: Duration = Duration::from_secs(1000);

fn session_setup(
    capacity: usize,
) -> (Arc<UserSessionCache>, Arc<InMemoryUserStore>, UserService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(UserSessionCache::new(
        SessionCacheConfig::new().with_ttl(TTL).with_capacity(capacity),
        clock.clone(),
    ));
    let store = Arc::new(InMemoryUserStore::new());
    let service = UserService::new(
        store.clone(),
        cache.clone(),
        MetricsHandle::unset(),
        clock.clone(),
        50,
    );
    (cache, store, service, clock)
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_capacity_two_evicts_oldest() {
    let cache = BoundedTtlCache::new(2, Arc::new(ManualClock::new()));
    cache.set(1, "a", TTL);
    cache.set(2, "b", TTL);
    cache.set(3, "c", TTL);

    assert_eq!(cache.get(&1), CacheResult::Miss);
    assert_eq!(cache.get(&2), CacheResult::Hit("b"));
    assert_eq!(cache.get(&3), CacheResult::Hit("c"));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_get_protects_from_next_eviction() {
    let cache = BoundedTtlCache::new(2, Arc::new(ManualClock::new()));
    cache.set(1, "a", TTL);
    cache.set(2, "b", TTL);
    assert!(cache.get(&1).is_hit());

    cache.set(3, "c", TTL);

    assert!(cache.get(&1).is_hit());
    assert!(cache.get(&2).is_miss());
}

#[test]
fn test_expiry_without_sweep() {
    let clock = Arc::new(ManualClock::new());
    let cache = BoundedTtlCache::new(10, clock.clone());
    cache.set("k", 1, TTL);

    clock.advance(TTL - Duration::from_secs(1));
    assert_eq!(cache.get(&"k"), CacheResult::Hit(1));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get(&"k"), CacheResult::Miss);
}

#[tokio::test]
async fn test_invalidate_then_delete_rejects_stale_fill() {
    let (cache, store, service, _) = session_setup(100);
    let id = UserId::new(42);
    let mut user = fixtures::user(42);
    user.consent_given = true;
    store.upsert_user(&user).await.unwrap();

    // A reader misses, takes a token and reads the pre-deletion row.
    let token = cache.begin_fill(id);
    let stale = store.fetch_user(id).await.unwrap().unwrap();

    // The deletion lands while the reader is between its read and its fill.
    assert!(service.delete_user(id).await.unwrap());

    assert!(!cache.fill(token, stale));
    assert_eq!(cache.get(id), CacheResult::Miss);
    assert_eq!(service.get_user_cached(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_reader_before_invalidation_sees_pre_deletion_or_miss() {
    let (cache, store, service, _) = session_setup(100);
    let id = UserId::new(7);
    store.upsert_user(&fixtures::user(7)).await.unwrap();
    service.get_user_cached(id).await.unwrap();

    let before = cache.get(id);
    service.delete_user(id).await.unwrap();
    let after = cache.get(id);

    assert_eq!(before.map(|u| u.user_id), CacheResult::Hit(id));
    assert_eq!(after, CacheResult::Miss);
}

#[tokio::test]
async fn test_stop_fences_interceptor_fill() {
    let (cache, store, service, _) = session_setup(100);
    let id = UserId::new(9);
    let mut user = fixtures::user(9);
    user.consent_given = true;
    store.upsert_user(&user).await.unwrap();
    let interceptor = RequestInterceptor::new(cache.clone(), MetricsHandle::unset());

    let ctx = interceptor.context_for(id);
    let token = ctx.fill_token.unwrap();
    let stale = store.fetch_user(id).await.unwrap().unwrap();

    service.stop_user(id).await.unwrap();

    // The pre-stop row must not overwrite the reset.
    assert!(!cache.fill(token, stale));
    let fresh = service.get_user_cached(id).await.unwrap().unwrap();
    assert!(!fresh.consent_given);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_and_deleter() {
    let (cache, store, service, _) = session_setup(1_000);
    let service = Arc::new(service);
    for i in 0..50 {
        store.upsert_user(&fixtures::user(i)).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..50 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                service.get_user_cached(UserId::new(i)).await.unwrap();
            }
        }));
    }
    for i in (0..50).step_by(2) {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.delete_user(UserId::new(i)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in (0..50).step_by(2) {
        assert!(cache.get(UserId::new(i)).is_miss(), "deleted user {} still cached", i);
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Set(i64, u32),
    Get(i64),
    Invalidate(i64),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..8, any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0i64..8).prop_map(Op::Get),
        (0i64..8).prop_map(Op::Invalidate),
        (0u64..600).prop_map(Op::Advance),
    ]
}

proptest! {
    /// With room for every key, the cache behaves like a map whose entries
    /// vanish once their TTL has elapsed or they are invalidated.
    #[test]
    fn prop_matches_expiring_map_model(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedTtlCache::new(16, clock.clone());
        let mut model: HashMap<i64, (u32, std::time::Instant)> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    cache.set(k, v, TTL);
                    model.insert(k, (v, clock.now() + TTL));
                }
                Op::Get(k) => {
                    let expected = model
                        .get(&k)
                        .filter(|(_, expires)| clock.now() < *expires)
                        .map(|(v, _)| *v);
                    prop_assert_eq!(cache.get(&k).into_option(), expected);
                }
                Op::Invalidate(k) => {
                    cache.invalidate(&k);
                    model.remove(&k);
                    prop_assert!(cache.get(&k).is_miss());
                }
                Op::Advance(secs) => clock.advance(Duration::from_secs(secs)),
            }
        }
    }

    /// Whatever the snapshot holds, the session cache never serves a
    /// daily message count.
    #[test]
    fn prop_session_cache_zeroes_daily_count(snapshot in generators::arb_user_snapshot()) {
        let cache = UserSessionCache::new(SessionCacheConfig::default(), Arc::new(ManualClock::new()));
        let id = snapshot.user_id;
        cache.set(snapshot.clone());

        let cached = cache.get(id).into_option();
        prop_assert!(cached.is_some());
        let cached = cached.unwrap();
        prop_assert_eq!(cached.daily_message_count, 0);
        prop_assert_eq!(cached.consent_given, snapshot.consent_given);
        prop_assert_eq!(cached.is_stopped, snapshot.is_stopped);
    }

    /// A fill issued before an invalidation of the same user is always
    /// rejected, whatever else happened in between.
    #[test]
    fn prop_fill_after_invalidation_rejected(
        user in generators::arb_small_user_id(),
        others in prop::collection::vec(generators::arb_small_user_id(), 0..10),
    ) {
        let cache = UserSessionCache::new(SessionCacheConfig::default(), Arc::new(ManualClock::new()));
        let token = cache.begin_fill(user);
        for other in others {
            cache.invalidate(other);
        }
        cache.invalidate(user);

        prop_assert!(!cache.fill(token, relay_core::UserSnapshot::empty(user)));
        prop_assert!(cache.get(user).is_miss());
    }
}
