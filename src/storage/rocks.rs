//! Persistent store using RocksDB
//!
//! Values are bincode-encoded `Entry` envelopes carrying their own expiry;
//! expired entries read as absent and are overwritten lazily. All writes go
//! through one mutex so read-modify-write operations are atomic within the
//! process that owns the database. Listing seeks to the literal prefix of a
//! pattern and resumes after the last key seen.

use super::{glob_match, literal_prefix, now_ms, parse_counter, Entry, FieldMap, KvStore, Value};
use crate::config::StorageConfig;
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StoreError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn new_with_config(config: &StorageConfig) -> Result<Self, StoreError> {
        if config.clear_on_start {
            tracing::warn!(path = %config.data_directory, "Clearing database on start");
            DB::destroy(&Options::default(), &config.data_directory)
                .map_err(|e| StoreError::DatabaseOpenFailed(e.to_string()))?;
        }
        Self::new(&config.data_directory)
    }

    fn read_entry(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let Some(bytes) = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
        else {
            return Ok(None);
        };
        decode(key, &bytes).map(|entry| entry.filter(|e| e.is_live(now_ms())))
    }

    fn write_entry(&self, key: &str, entry: &Entry) -> Result<(), StoreError> {
        let bytes = bincode::serialize(entry)
            .map_err(|e| StoreError::WriteFailed(format!("Failed to encode {}: {}", key, e)))?;
        self.db.put(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let _guard = self.write_lock.lock();
        let (next, expires_at_ms) = match self.read_entry(key)? {
            Some(entry) => (parse_counter(key, &entry.value)? + delta, entry.expires_at_ms),
            None => (delta, None),
        };
        self.write_entry(
            key,
            &Entry {
                value: Value::Str(next.to_string()),
                expires_at_ms,
            },
        )?;
        Ok(next)
    }

    /// Walk keys sharing the pattern prefix, after `cursor` when given.
    /// Stops once `limit` keys were examined and another one follows.
    fn walk(
        &self,
        cursor: Option<&str>,
        pattern: &str,
        limit: Option<usize>,
    ) -> Result<(Vec<String>, Option<String>), StoreError> {
        let prefix = literal_prefix(pattern);
        let start = cursor.unwrap_or(prefix);
        let now = now_ms();

        let mut matched = Vec::new();
        let mut examined = 0;
        let mut last: Option<String> = None;

        let iter = self
            .db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));
        for item in iter {
            let (raw_key, value) = item.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
            let key = String::from_utf8_lossy(&raw_key).into_owned();
            if cursor == Some(key.as_str()) {
                continue;
            }
            if !key.starts_with(prefix) {
                break;
            }
            if limit.is_some_and(|l| examined >= l) {
                return Ok((matched, last));
            }
            examined += 1;
            let live = decode(&key, &value)?.is_some_and(|e| e.is_live(now));
            if live && glob_match(pattern, &key) {
                matched.push(key.clone());
            }
            last = Some(key);
        }
        Ok((matched, None))
    }
}

fn decode(key: &str, bytes: &[u8]) -> Result<Option<Entry>, StoreError> {
    bincode::deserialize::<Entry>(bytes)
        .map(Some)
        .map_err(|e| StoreError::CorruptedData(format!("Failed to decode {}: {}", key, e)))
}

#[async_trait]
impl KvStore for RocksStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read_entry(key)?.map(|e| e.value) {
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(Value::Hash(_)) => Err(StoreError::ReadFailed(format!(
                "{} holds a hash record, not a string",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.write_entry(key, &Entry::new(Value::Str(value.to_string()), ttl))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        if self.read_entry(key)?.is_some() {
            return Ok(false);
        }
        self.write_entry(key, &Entry::new(Value::Str(value.to_string()), ttl))?;
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let existed = self.read_entry(key)?.is_some();
        self.db.delete(key.as_bytes())?;
        Ok(existed)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        match self.read_entry(key)? {
            Some(entry) if entry.value == Value::Str(expected.to_string()) => {
                self.db.delete(key.as_bytes())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, 1)
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, -1)
    }

    async fn hset(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let merged = match self.read_entry(key)?.map(|e| e.value) {
            Some(Value::Hash(mut existing)) => {
                existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                existing
            }
            Some(Value::Str(_)) => {
                return Err(StoreError::WriteFailed(format!(
                    "{} holds a string, not a hash record",
                    key
                )))
            }
            None => fields.clone(),
        };
        self.write_entry(key, &Entry::new(Value::Hash(merged), None))
    }

    async fn hget_all(&self, key: &str) -> Result<FieldMap, StoreError> {
        match self.read_entry(key)?.map(|e| e.value) {
            Some(Value::Hash(fields)) => Ok(fields),
            Some(Value::Str(_)) => Err(StoreError::ReadFailed(format!(
                "{} holds a string, not a hash record",
                key
            ))),
            None => Ok(FieldMap::new()),
        }
    }

    async fn hget_all_many(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        let now = now_ms();
        let results = self.db.multi_get(keys.iter().map(|k| k.as_bytes()));

        keys.iter()
            .zip(results)
            .map(|(key, result)| {
                let bytes = result.map_err(|e| StoreError::ReadFailed(e.to_string()))?;
                let entry = match bytes {
                    Some(bytes) => decode(key, &bytes)?.filter(|e| e.is_live(now)),
                    None => None,
                };
                match entry.map(|e| e.value) {
                    Some(Value::Hash(fields)) => Ok(fields),
                    Some(Value::Str(_)) | None => Ok(FieldMap::new()),
                }
            })
            .collect()
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.walk(None, pattern, None)?.0)
    }

    async fn scan(
        &self,
        cursor: Option<&str>,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, Option<String>), StoreError> {
        self.walk(cursor, pattern, Some(count.max(1)))
    }
}
