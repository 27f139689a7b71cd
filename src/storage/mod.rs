//! Record store abstraction
//!
//! A flat key space holding either plain string values (optionally with a
//! TTL) or hash records (field -> string). The operations mirror what a
//! Redis-like backend offers: set-if-absent, compare-and-delete, atomic
//! increment, glob listing and cursor scans. Everything above this module
//! talks to `dyn KvStore` only.

mod memory;
mod pattern;
mod rocks;

pub use memory::MemoryStore;
pub use pattern::{glob_match, literal_prefix};
pub use rocks::RocksStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Field map of a hash record
pub type FieldMap = BTreeMap<String, String>;

pub type SharedStore = Arc<dyn KvStore>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value; `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional write; replaces any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete only while the key still holds `expected`
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Atomic increment; a missing key counts as 0. TTL is preserved.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomic decrement; a missing key counts as 0. TTL is preserved.
    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    /// Merge fields into a hash record
    async fn hset(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError>;

    /// All fields of a hash record; empty when missing
    async fn hget_all(&self, key: &str) -> Result<FieldMap, StoreError>;

    /// Pipelined `hget_all` over many keys, results in key order
    async fn hget_all_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError>;

    /// Every live key matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Examine up to `count` keys in key order after `cursor` (`None` to
    /// start) and return the matching ones plus the cursor to resume from.
    /// A returned `None` means the scan is done. Only keys sharing the
    /// pattern's literal prefix are examined.
    async fn scan(
        &self,
        cursor: Option<&str>,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, Option<String>), StoreError>;
}

/// Stored value shape shared by the backends
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub(crate) enum Value {
    Str(String),
    Hash(FieldMap),
}

/// Value plus absolute expiry in unix milliseconds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Entry {
    pub value: Value,
    pub expires_at_ms: Option<u64>,
}

impl Entry {
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|ttl| now_ms().saturating_add(ttl.as_millis() as u64)),
        }
    }

    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now_ms)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn parse_counter(key: &str, value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Str(s) => s.parse().map_err(|_| StoreError::NotAnInteger { key: key.to_string() }),
        Value::Hash(_) => Err(StoreError::NotAnInteger { key: key.to_string() }),
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share

    use super::*;

    pub async fn check_strings(store: &dyn KvStore) {
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        assert!(!store.set_nx("a", "2", None).await.unwrap());
        assert!(store.set_nx("b", "2", None).await.unwrap());
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));

        assert!(!store.del_if_eq("b", "3").await.unwrap());
        assert!(store.del_if_eq("b", "2").await.unwrap());
        assert_eq!(store.get("b").await.unwrap(), None);

        assert!(store.del("a").await.unwrap());
        assert!(!store.del("a").await.unwrap());
    }

    pub async fn check_counters(store: &dyn KvStore) {
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.decr("counter").await.unwrap(), 1);
        assert_eq!(store.decr("missing").await.unwrap(), -1);

        store.set("text", "abc", None).await.unwrap();
        assert!(matches!(
            store.incr("text").await,
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    pub async fn check_ttl(store: &dyn KvStore) {
        store
            .set("short", "x", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
        // expired keys behave as absent
        assert!(store.set_nx("short", "y", None).await.unwrap());
    }

    pub async fn check_hashes(store: &dyn KvStore) {
        let mut fields = FieldMap::new();
        fields.insert("id".to_string(), "7".to_string());
        fields.insert("name".to_string(), "ann".to_string());
        store.hset("user:7", &fields).await.unwrap();

        let mut update = FieldMap::new();
        update.insert("name".to_string(), "bob".to_string());
        store.hset("user:7", &update).await.unwrap();

        let read = store.hget_all("user:7").await.unwrap();
        assert_eq!(read.get("id").map(String::as_str), Some("7"));
        assert_eq!(read.get("name").map(String::as_str), Some("bob"));
        assert!(store.hget_all("user:8").await.unwrap().is_empty());

        let many = store
            .hget_all_many(&["user:8".to_string(), "user:7".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(many[0].is_empty());
        assert_eq!(many[1], read);
    }

    pub async fn check_listing(store: &dyn KvStore) {
        let fields = FieldMap::from([("x".to_string(), "1".to_string())]);
        for key in ["game:p1:p2:1", "game:p3:p1:2", "game:p10:p4:3", "user:1"] {
            store.hset(key, &fields).await.unwrap();
        }

        let mut keys = store.keys("game:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["game:p10:p4:3", "game:p1:p2:1", "game:p3:p1:2"]);
        assert_eq!(store.keys("game:p1:*").await.unwrap(), vec!["game:p1:p2:1"]);

        let (seen, pages) = scan_all(store, "game:*", 1).await;
        assert_eq!(seen, vec!["game:p10:p4:3", "game:p1:p2:1", "game:p3:p1:2"]);
        assert_eq!(pages, 3);
    }

    /// Unrelated keys outside the pattern prefix are never examined
    pub async fn check_scan_seeks_prefix(store: &dyn KvStore) {
        let fields = FieldMap::from([("x".to_string(), "1".to_string())]);
        for id in 0..500 {
            store.set(&format!("user:{}", id), "u", None).await.unwrap();
            store.set(&format!("aaa:{}", id), "a", None).await.unwrap();
        }
        for key in ["game:p1:p2:1", "game:p1:p3:2", "game:p2:p1:3"] {
            store.hset(key, &fields).await.unwrap();
        }

        let (seen, pages) = scan_all(store, "game:p1:*", 1).await;
        assert_eq!(seen, vec!["game:p1:p2:1", "game:p1:p3:2"]);
        assert_eq!(pages, 2);

        // a resumed cursor picks up keys written after it
        let (first, cursor) = store.scan(None, "game:*", 1).await.unwrap();
        assert_eq!(first, vec!["game:p1:p2:1"]);
        store.hset("game:p1:p9:4", &fields).await.unwrap();
        let (second, _) = store.scan(cursor.as_deref(), "game:*", 10).await.unwrap();
        assert_eq!(second, vec!["game:p1:p3:2", "game:p1:p9:4", "game:p2:p1:3"]);

        let (users, _) = scan_all(store, "user:4*", 1000).await;
        assert_eq!(users.len(), 111);
    }

    async fn scan_all(store: &dyn KvStore, pattern: &str, count: usize) -> (Vec<String>, usize) {
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let (page, next) = store.scan(cursor.as_deref(), pattern, count).await.unwrap();
            pages += 1;
            seen.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => return (seen, pages),
            }
        }
    }
}
