//! In-process cache layer.
//!
//! # Design Philosophy
//!
//! The cache shields the relational store from per-message reads of the same
//! user record. It is deliberately small: one map behind one mutex, a hard
//! capacity with LRU eviction, and a TTL after which an entry is invisible
//! whether or not anything swept it yet.
//!
//! Lookups return [`CacheResult`] so callers cannot confuse "not cached" with
//! "cached as empty".
//!
//! # Example
//!
//! ```ignore
//! let cache = UserSessionCache::new(SessionCacheConfig::default(), clock);
//!
//! let snapshot = match cache.get(user_id) {
//!     CacheResult::Hit(snapshot) => snapshot,
//!     CacheResult::Miss => {
//!         let token = cache.begin_fill(user_id);
//!         let snapshot = store.fetch_user(user_id).await?.unwrap_or_default();
//!         cache.fill(token, snapshot.clone());
//!         snapshot
//!     }
//! };
//!
//! // Destructive mutations go through the composite operation.
//! cache.invalidate_then(user_id, || store.delete_user(user_id)).await?;
//! ```

pub mod result;
pub mod session;
pub mod stats;
pub mod ttl;

pub use result::CacheResult;
pub use session::{
    FillToken, SessionCacheConfig, UserSessionCache, DEFAULT_SESSION_CAPACITY,
    DEFAULT_SESSION_TTL,
};
pub use stats::CacheStats;
pub use ttl::{BoundedTtlCache, CacheEntry};
