//! Relay Storage - Session Cache and Persistence Traits
//!
//! The bounded TTL cache that sits in front of the user store, and the async
//! traits the bot uses to reach persistent state. The actual database
//! implementation lives outside this workspace.

pub mod cache;
pub mod gateway;
pub mod user_store;

pub use cache::{
    BoundedTtlCache, CacheEntry, CacheResult, CacheStats, FillToken, SessionCacheConfig,
    UserSessionCache,
};
pub use gateway::{InMemoryGateway, PersistenceGateway};
pub use user_store::{InMemoryUserStore, UserStore};
