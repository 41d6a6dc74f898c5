//! User record access.
//!
//! The relational schema is out of scope; [`UserStore`] is the boundary the
//! bot talks to. [`InMemoryUserStore`] backs tests and database-less runs.

use std::collections::HashMap;

use ::async_trait::async_trait;
use chrono::NaiveDate;
use relay_core::{RelayResult, StorageError, UserId, UserSnapshot, UserUpdate};
use tokio::sync::RwLock;

/// Async user store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user record.
    async fn fetch_user(&self, user_id: UserId) -> RelayResult<Option<UserSnapshot>>;

    /// Create a user or refresh its profile fields. Returns true when created.
    async fn upsert_user(&self, snapshot: &UserSnapshot) -> RelayResult<bool>;

    /// Apply a partial update. Fails with `NotFound` for unknown users.
    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> RelayResult<()>;

    /// Delete the user's conversation history. Returns rows removed.
    async fn delete_messages(&self, user_id: UserId) -> RelayResult<u64>;

    /// Delete the user record. Returns whether it existed.
    async fn delete_user(&self, user_id: UserId) -> RelayResult<bool>;

    /// Messages sent by the user on `day`.
    async fn daily_message_count(&self, user_id: UserId, day: NaiveDate) -> RelayResult<u32>;

    /// Bump the user's counter for `day` and return the new count.
    async fn increment_daily_message_count(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RelayResult<u32>;

    /// Every known user id.
    async fn list_user_ids(&self) -> RelayResult<Vec<UserId>>;
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserSnapshot>,
    messages: HashMap<UserId, u64>,
    daily_counts: HashMap<(UserId, NaiveDate), u32>,
}

/// In-memory user store.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` stored messages for a user.
    pub async fn add_messages(&self, user_id: UserId, count: u64) {
        let mut tables = self.tables.write().await;
        *tables.messages.entry(user_id).or_insert(0) += count;
    }

    pub async fn message_count(&self, user_id: UserId) -> u64 {
        let tables = self.tables.read().await;
        tables.messages.get(&user_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn fetch_user(&self, user_id: UserId) -> RelayResult<Option<UserSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn upsert_user(&self, snapshot: &UserSnapshot) -> RelayResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&snapshot.user_id) {
            Some(existing) => {
                existing.username = snapshot.username.clone();
                existing.first_name = snapshot.first_name.clone();
                existing.last_name = snapshot.last_name.clone();
                Ok(false)
            }
            None => {
                tables.users.insert(snapshot.user_id, snapshot.clone());
                Ok(true)
            }
        }
    }

    async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> RelayResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::NotFound { user_id })?;
        for field in update.fields() {
            field.apply(user);
        }
        Ok(())
    }

    async fn delete_messages(&self, user_id: UserId) -> RelayResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables.messages.remove(&user_id).unwrap_or(0))
    }

    async fn delete_user(&self, user_id: UserId) -> RelayResult<bool> {
        let mut tables = self.tables.write().await;
        tables.messages.remove(&user_id);
        tables.daily_counts.retain(|(id, _), _| *id != user_id);
        Ok(tables.users.remove(&user_id).is_some())
    }

    async fn daily_message_count(&self, user_id: UserId, day: NaiveDate) -> RelayResult<u32> {
        let tables = self.tables.read().await;
        Ok(tables.daily_counts.get(&(user_id, day)).copied().unwrap_or(0))
    }

    async fn increment_daily_message_count(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RelayResult<u32> {
        let mut tables = self.tables.write().await;
        let count = tables.daily_counts.entry((user_id, day)).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    async fn list_user_ids(&self) -> RelayResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<UserId> = tables.users.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{RelayError, SubscriptionStatus};

    fn user(id: i64) -> UserSnapshot {
        let mut snap = UserSnapshot::empty(UserId::new(id));
        snap.username = Some(format!("u{}", id));
        snap
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_creates_then_refreshes_profile() {
        let store = InMemoryUserStore::new();
        assert!(store.upsert_user(&user(1)).await.unwrap());

        let mut renamed = user(1);
        renamed.username = Some("renamed".to_string());
        renamed.consent_given = true;
        assert!(!store.upsert_user(&renamed).await.unwrap());

        let stored = store.fetch_user(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("renamed"));
        // Profile refresh does not touch consent.
        assert!(!stored.consent_given);
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_not_found() {
        let store = InMemoryUserStore::new();
        let update = UserUpdate {
            consent_given: Some(true),
            ..Default::default()
        };
        let err = store.update_user(UserId::new(9), &update).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Storage(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_applies_fields() {
        let store = InMemoryUserStore::new();
        store.upsert_user(&user(1)).await.unwrap();
        let update = UserUpdate {
            subscription_status: Some(SubscriptionStatus::Premium),
            ..Default::default()
        };
        store.update_user(UserId::new(1), &update).await.unwrap();

        let stored = store.fetch_user(UserId::new(1)).await.unwrap().unwrap();
        assert!(stored.subscription_status.is_premium());
    }

    #[tokio::test]
    async fn test_daily_counts_are_per_day() {
        let store = InMemoryUserStore::new();
        let id = UserId::new(1);
        store.increment_daily_message_count(id, today()).await.unwrap();
        assert_eq!(store.increment_daily_message_count(id, today()).await.unwrap(), 2);

        let tomorrow = today().succ_opt().unwrap();
        assert_eq!(store.daily_message_count(id, tomorrow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_user_removes_everything() {
        let store = InMemoryUserStore::new();
        let id = UserId::new(1);
        store.upsert_user(&user(1)).await.unwrap();
        store.add_messages(id, 4).await;
        store.increment_daily_message_count(id, today()).await.unwrap();

        assert!(store.delete_user(id).await.unwrap());
        assert!(!store.delete_user(id).await.unwrap());
        assert_eq!(store.fetch_user(id).await.unwrap(), None);
        assert_eq!(store.message_count(id).await, 0);
        assert_eq!(store.daily_message_count(id, today()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_user_ids_sorted() {
        let store = InMemoryUserStore::new();
        for id in [3, 1, 2] {
            store.upsert_user(&user(id)).await.unwrap();
        }
        let ids = store.list_user_ids().await.unwrap();
        assert_eq!(ids, vec![UserId::new(1), UserId::new(2), UserId::new(3)]);
    }
}
