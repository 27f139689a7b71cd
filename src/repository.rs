//! Typed access to hash records

use crate::errors::{StoreError, TrustResult};
use crate::records::Record;
use crate::storage::SharedStore;
use std::marker::PhantomData;

/// Keys examined per scan page
const SCAN_PAGE: usize = 100;

pub struct Repository<T> {
    store: SharedStore,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> Repository<T> {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    pub async fn save(&self, record: &T) -> TrustResult<()> {
        self.store.hset(&record.key(), &record.encode()).await?;
        Ok(())
    }

    /// `None` when no record is stored under `key`
    pub async fn get(&self, key: &str) -> TrustResult<Option<T>> {
        let fields = self.store.hget_all(key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(T::decode(&fields)?))
    }

    /// Collect up to `limit` matching keys page by page, then load them in
    /// one pipelined read. Keys come back in key order.
    pub async fn scan(&self, pattern: &str, limit: usize) -> TrustResult<Vec<T>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let (page, next) = self.store.scan(cursor.as_deref(), pattern, SCAN_PAGE).await?;
            keys.extend(page);
            match next {
                Some(next) if keys.len() < limit => cursor = Some(next),
                _ => break,
            }
        }
        keys.truncate(limit);
        self.get_many(&keys).await
    }

    /// Load several records at once. Keys with nothing stored are skipped.
    pub async fn get_many(&self, keys: &[String]) -> TrustResult<Vec<T>> {
        let mut records = Vec::with_capacity(keys.len());
        for fields in self.store.hget_all_many(keys).await? {
            if !fields.is_empty() {
                records.push(T::decode(&fields)?);
            }
        }
        Ok(records)
    }
}

/// Next value of an id sequence; the first caller gets 1
pub async fn next_id(store: &SharedStore, key: &str) -> TrustResult<u64> {
    let id = store.incr(key).await?;
    u64::try_from(id).map_err(|_| {
        StoreError::CorruptedData(format!("sequence {} went negative: {}", key, id)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameConfig, UserConfig};
    use crate::games::types::{Game, User};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn store() -> SharedStore {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = Repository::<User>::new(store());
        let user = User::new(3, "carol", 2, &UserConfig::default());

        repo.save(&user).await.unwrap();
        assert_eq!(repo.get("user:3").await.unwrap(), Some(user));
        assert_eq!(repo.get("user:4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_respects_limit() {
        let repo = Repository::<Game>::new(store());
        for id in 1..=5 {
            repo.save(&Game::new(id, 1, 2, &GameConfig::default()))
                .await
                .unwrap();
        }

        assert_eq!(repo.scan("game:*", 10).await.unwrap().len(), 5);
        assert_eq!(repo.scan("game:*", 2).await.unwrap().len(), 2);
        assert!(repo.scan("game:p9:*", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_collects_every_page() {
        let repo = Repository::<Game>::new(store());
        for id in 1..=250 {
            repo.save(&Game::new(id, 1, 2, &GameConfig::default()))
                .await
                .unwrap();
        }

        let games = repo.scan("game:p1:p2:1*", 500).await.unwrap();
        // 1, 10..=19, 100..=199
        assert_eq!(games.len(), 111);
        assert_eq!(repo.scan("game:p1:*", 150).await.unwrap().len(), 150);
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let repo = Repository::<User>::new(store());
        let config = UserConfig::default();
        repo.save(&User::new(1, "a", 1, &config)).await.unwrap();
        repo.save(&User::new(3, "c", 1, &config)).await.unwrap();

        let keys: Vec<String> = (1..=3).map(User::key_for).collect();
        let users = repo.get_many(&keys).await.unwrap();
        assert_eq!(users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one() {
        let store = store();
        assert_eq!(next_id(&store, "trust:game:index").await.unwrap(), 1);
        assert_eq!(next_id(&store, "trust:game:index").await.unwrap(), 2);
    }
}
