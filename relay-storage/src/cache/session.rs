//! Per-user session cache.
//!
//! [`UserSessionCache`] is a [`BoundedTtlCache`] keyed by [`UserId`] holding
//! [`UserSnapshot`]s, plus the ordering guarantees destructive store
//! mutations need.
//!
//! # Stale fills
//!
//! A request that misses the cache reads the store and then inserts what it
//! read. If a destructive mutation of the same user runs between that read and
//! the insert, the insert would resurrect pre-mutation data. To rule this out:
//!
//! 1. Readers take a [`FillToken`] with [`UserSessionCache::begin_fill`]
//!    *before* reading the store, and insert with [`UserSessionCache::fill`].
//! 2. [`UserSessionCache::invalidate`], [`UserSessionCache::mark_then`],
//!    [`UserSessionCache::claim`] and
//!    [`UserSessionCache::commit_fields`] leave a tombstone carrying a fresh
//!    generation number.
//! 3. `fill` is rejected when the user has a tombstone newer than the token.
//!
//! Tombstones live as long as the cache TTL; tokens older than the TTL are
//! rejected outright, so pruning a tombstone never reopens the window.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use relay_core::{Clock, UserField, UserId, UserSnapshot};

use super::result::CacheResult;
use super::stats::CacheStats;
use super::ttl::BoundedTtlCache;

/// Default session TTL (30 minutes).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Default session capacity.
pub const DEFAULT_SESSION_CAPACITY: usize = 10_000;

/// Session cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCacheConfig {
    /// How long a snapshot stays visible after it was set.
    pub ttl: Duration,
    /// Maximum number of cached users. Zero disables caching.
    pub capacity: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            capacity: DEFAULT_SESSION_CAPACITY,
        }
    }
}

impl SessionCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Proof that a store read started at a known point.
///
/// Obtained from [`UserSessionCache::begin_fill`] before the read; consumed by
/// [`UserSessionCache::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken {
    user_id: UserId,
    generation: u64,
    issued_at: Instant,
}

impl FillToken {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// Cache of [`UserSnapshot`]s keyed by user id.
#[derive(Debug)]
pub struct UserSessionCache {
    cache: BoundedTtlCache<UserId, UserSnapshot>,
    ttl: Duration,
    generation: AtomicU64,
    /// Last destructive generation per user. Lock order: tombstones, then cache.
    tombstones: Mutex<HashMap<UserId, (u64, Instant)>>,
}

impl UserSessionCache {
    pub fn new(config: SessionCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: BoundedTtlCache::new(config.capacity, clock),
            ttl: config.ttl,
            generation: AtomicU64::new(0),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    fn now(&self) -> Instant {
        self.cache.clock().now()
    }

    fn tombstones(&self) -> MutexGuard<'_, HashMap<UserId, (u64, Instant)>> {
        self.tombstones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a destructive event for `user_id` and return the guard so the
    /// caller can touch the cache before anyone else fills it.
    fn tombstone(&self, user_id: UserId) -> MutexGuard<'_, HashMap<UserId, (u64, Instant)>> {
        let mut tombstones = self.tombstones();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tombstones.insert(user_id, (generation, self.now()));
        tombstones
    }

    /// Look up a user's snapshot.
    pub fn get(&self, user_id: UserId) -> CacheResult<UserSnapshot> {
        self.cache.get(&user_id)
    }

    /// The cached snapshot, or a zero-value one. The default is not cached.
    pub fn get_or_default(&self, user_id: UserId) -> UserSnapshot {
        self.get(user_id)
            .unwrap_or_else(|| UserSnapshot::empty(user_id))
    }

    /// Insert or replace a snapshot.
    ///
    /// The daily message counter is zeroed: quota checks read the store.
    pub fn set(&self, mut snapshot: UserSnapshot) {
        snapshot.daily_message_count = 0;
        self.cache.set(snapshot.user_id, snapshot, self.ttl);
    }

    /// Start a miss-fill. Call before reading the store.
    pub fn begin_fill(&self, user_id: UserId) -> FillToken {
        FillToken {
            user_id,
            generation: self.generation.load(Ordering::SeqCst),
            issued_at: self.now(),
        }
    }

    /// Insert a snapshot read under `token`.
    ///
    /// Returns false, without caching, when a destructive operation on this
    /// user happened after the token was issued or the token has outlived the
    /// TTL.
    pub fn fill(&self, token: FillToken, mut snapshot: UserSnapshot) -> bool {
        if snapshot.user_id != token.user_id {
            tracing::warn!(
                token_user = %token.user_id,
                snapshot_user = %snapshot.user_id,
                "Fill token used for a different user"
            );
            return false;
        }
        if self.now().saturating_duration_since(token.issued_at) >= self.ttl {
            return false;
        }

        let tombstones = self.tombstones();
        if let Some((generation, _)) = tombstones.get(&token.user_id) {
            if *generation > token.generation {
                tracing::debug!(user_id = %token.user_id, "Discarding stale session fill");
                return false;
            }
        }
        snapshot.daily_message_count = 0;
        self.cache.set(snapshot.user_id, snapshot, self.ttl);
        drop(tombstones);
        true
    }

    /// Overwrite one field of a cached snapshot. No-op on a miss.
    pub fn update_field(&self, user_id: UserId, field: UserField) -> bool {
        self.cache.update_with(&user_id, |snapshot| field.apply(snapshot))
    }

    /// Reflect a store write that already succeeded.
    ///
    /// Fills that read the store before the write are fenced off, then the
    /// cached snapshot (if any) gets the new values. Returns whether a cached
    /// snapshot was updated.
    pub fn commit_fields(&self, user_id: UserId, fields: Vec<UserField>) -> bool {
        let _tombstones = self.tombstone(user_id);
        let mut updated = false;
        for field in fields {
            updated |= self
                .cache
                .update_with(&user_id, |snapshot| field.apply(snapshot));
        }
        updated
    }

    /// Write `fields` into the cached snapshot unless `done` already holds.
    ///
    /// Check and write happen under one lock, so of two concurrent claims on
    /// a cached user exactly one wins. Returns false only when a live
    /// snapshot satisfies `done`; a miss has nothing to guard and claims.
    pub fn claim(
        &self,
        user_id: UserId,
        done: fn(&UserSnapshot) -> bool,
        fields: &[UserField],
    ) -> bool {
        let _tombstones = self.tombstone(user_id);
        let mut claimed = true;
        self.cache.update_with(&user_id, |snapshot| {
            if done(snapshot) {
                claimed = false;
                return;
            }
            for field in fields {
                field.clone().apply(snapshot);
            }
        });
        claimed
    }

    /// Drop a user's snapshot and fence off in-flight fills.
    pub fn invalidate(&self, user_id: UserId) -> bool {
        let _tombstones = self.tombstone(user_id);
        self.cache.invalidate(&user_id)
    }

    /// Invalidate `user_id`, then run the store mutation.
    ///
    /// Destructive store operations go through here. The snapshot is dropped
    /// again once the mutation returns, so a fill whose read overlapped the
    /// mutation cannot leave pre-mutation fields behind.
    pub async fn invalidate_then<F, Fut, T, E>(&self, user_id: UserId, mutation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.invalidate(user_id);
        let result = mutation().await;
        // Drop anything filled from a read that raced the mutation.
        self.invalidate(user_id);
        result
    }

    /// Write `fields` into the cached snapshot, then run the store mutation.
    ///
    /// Used when the cached entry must keep existing with new flags (the
    /// stop command sets `is_stopped` before resetting the user's data).
    /// In-flight fills are fenced off before and after the mutation.
    pub async fn mark_then<F, Fut, T, E>(
        &self,
        user_id: UserId,
        fields: Vec<UserField>,
        mutation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.commit_fields(user_id, fields.clone());
        let result = mutation().await;
        // Reapply over anything filled while the mutation ran.
        self.commit_fields(user_id, fields);
        result
    }

    /// Drop expired snapshots and tombstones. Returns snapshots removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        self.tombstones()
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < ttl);
        self.cache.sweep_expired(now)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
