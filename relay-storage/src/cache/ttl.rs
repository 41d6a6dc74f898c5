//! Bounded TTL cache with least-recently-used eviction.
//!
//! Entries live in a hash map. Recency is tracked by a queue of
//! `(key, stamp)` pairs: every access pushes a fresh stamp to the back and
//! leaves the old pair behind as a stale marker. Eviction pops from the front,
//! skipping markers whose stamp no longer matches the entry. The queue is
//! compacted once stale markers outnumber live entries, so `get` and `set`
//! stay O(1) amortized.
//!
//! Expired entries are dropped lazily on `get`, and in bulk by
//! [`BoundedTtlCache::sweep_expired`], which only the background scheduler
//! calls.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use relay_core::Clock;

use super::result::CacheResult;
use super::stats::CacheStats;

/// Stale markers tolerated before the recency queue is compacted.
const COMPACT_SLACK: usize = 64;

/// Upper bound used when `now + ttl` would overflow `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A cached value with its timing metadata.
///
/// Read-only outside this module; [`BoundedTtlCache::peek`] hands out copies.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    created_at: Instant,
    last_accessed_at: Instant,
    expires_at: Instant,
    stamp: u64,
}

impl<K, V> CacheEntry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at
    }

    /// `created_at + ttl`; field updates never move it.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Visible to readers only while `now < expires_at`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<K, V>>,
    recency: VecDeque<(K, u64)>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            next_stamp: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Record an access to `key` and return its new stamp.
    fn push_recency(&mut self, key: &K) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.recency.push_back((key.clone(), stamp));
        stamp
    }

    /// Drop the least-recently-accessed entry. Returns false when empty.
    fn evict_lru(&mut self) -> bool {
        while let Some((key, stamp)) = self.recency.pop_front() {
            let is_current = self.entries.get(&key).is_some_and(|e| e.stamp == stamp);
            if is_current {
                self.entries.remove(&key);
                self.evictions += 1;
                return true;
            }
        }
        false
    }

    fn maybe_compact(&mut self) {
        if self.recency.len() <= self.entries.len() * 2 + COMPACT_SLACK {
            return;
        }
        let Inner {
            entries, recency, ..
        } = self;
        recency.retain(|(key, stamp)| entries.get(key).is_some_and(|e| e.stamp == *stamp));
    }
}

/// Generic keyed cache with per-entry TTL and a hard capacity.
///
/// All operations take one process-wide mutex. Values are cloned out on
/// `get`, so readers never hold the lock while using a value.
pub struct BoundedTtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> BoundedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero disables caching: every `set` is dropped.
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            capacity,
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The clock this cache measures expiry against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // A panic inside `update_with` can poison the lock; the map itself is
        // still consistent, so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, refreshing its access time on a hit.
    pub fn get(&self, key: &K) -> CacheResult<V> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let live = match inner.entries.get(key) {
            Some(entry) => entry.is_live(now),
            None => {
                inner.misses += 1;
                return CacheResult::Miss;
            }
        };

        if !live {
            inner.entries.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return CacheResult::Miss;
        }

        let stamp = inner.push_recency(key);
        inner.hits += 1;
        let value = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed_at = now;
                entry.stamp = stamp;
                entry.value.clone()
            }
            None => return CacheResult::Miss,
        };
        inner.maybe_compact();
        CacheResult::Hit(value)
    }

    /// Copy of the live entry for `key`, without touching recency or stats.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let now = self.clock.now();
        self.lock()
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .cloned()
    }

    /// Insert or replace `key`.
    ///
    /// When the cache is full and `key` is new, the least-recently-accessed
    /// entry is evicted first, whatever its remaining TTL.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        if self.capacity == 0 {
            self.lock().evictions += 1;
            return;
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + MAX_TTL.min(ttl));
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.capacity {
                if !inner.evict_lru() {
                    break;
                }
            }
        }

        let stamp = inner.push_recency(&key);
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                last_accessed_at: now,
                expires_at,
                stamp,
            },
        );
        inner.maybe_compact();
    }

    /// Mutate a live entry in place.
    ///
    /// Refreshes `last_accessed_at` but leaves `expires_at` alone. Returns
    /// false (and does nothing) when the key is absent or expired. `f` runs
    /// under the cache lock and must not call back into this cache.
    pub fn update_with<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let now = self.clock.now();
        let mut inner = self.lock();

        let live = match inner.entries.get(key) {
            Some(entry) => entry.is_live(now),
            None => return false,
        };
        if !live {
            inner.entries.remove(key);
            inner.expirations += 1;
            return false;
        }

        let stamp = inner.push_recency(key);
        if let Some(entry) = inner.entries.get_mut(key) {
            f(&mut entry.value);
            entry.last_accessed_at = now;
            entry.stamp = stamp;
        }
        inner.maybe_compact();
        true
    }

    /// Remove `key`. Idempotent; returns whether an entry was present.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        inner.maybe_compact();
        removed
    }

    /// Remove every entry with `expires_at <= now`. Returns how many.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - inner.entries.len();
        inner.expirations += removed as u64;
        inner.maybe_compact();
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len() as u64,
            capacity: self.capacity as u64,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    #[cfg(test)]
    fn recency_len(&self) -> usize {
        self.lock().recency.len()
    }
}

impl<K, V> std::fmt::Debug for BoundedTtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTtlCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
