//! In-process store on an ordered map.
//!
//! One read-write lock guards the whole map, so every read-modify-write is
//! atomic. Keys stay sorted, which lets `keys` and `scan` seek to the literal
//! prefix of a pattern and resume from the last key they returned.

use super::{glob_match, literal_prefix, now_ms, parse_counter, Entry, FieldMap, KvStore, Value};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::btree_map::Entry as MapEntry;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Value> {
        let now = now_ms();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        None
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut entries = self.entries.write();
        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let next = parse_counter(key, &occupied.get().value)? + delta;
                occupied.get_mut().value = Value::Str(next.to_string());
                Ok(next)
            }
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(Entry::new(Value::Str(delta.to_string()), None));
                Ok(delta)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Str(delta.to_string()), None));
                Ok(delta)
            }
        }
    }

    /// Walk keys sharing the pattern prefix, after `cursor` when given.
    /// Stops once `limit` keys were examined and another one follows.
    fn walk(&self, cursor: Option<&str>, pattern: &str, limit: Option<usize>) -> (Vec<String>, Option<String>) {
        let prefix = literal_prefix(pattern);
        let lower = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let now = now_ms();
        let entries = self.entries.read();
        let mut matched = Vec::new();
        let mut examined = 0;
        let mut last: Option<&String> = None;

        for (key, entry) in entries.range::<String, _>((lower, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if limit.is_some_and(|l| examined >= l) {
                return (matched, last.cloned());
            }
            examined += 1;
            last = Some(key);
            if entry.is_live(now) && glob_match(pattern, key) {
                matched.push(key.clone());
            }
        }
        (matched, None)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live(key) {
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(Value::Hash(_)) => Err(StoreError::ReadFailed(format!(
                "{} holds a hash record, not a string",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let now = now_ms();
        let entry = Entry::new(Value::Str(value.to_string()), ttl);
        let mut entries = self.entries.write();
        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(entry);
                    Ok(true)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut entries = self.entries.write();
        let holds = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == Value::Str(expected.to_string()));
        if holds {
            entries.remove(key);
        }
        Ok(holds)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, 1)
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, -1)
    }

    async fn hset(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError> {
        let now = now_ms();
        let mut entries = self.entries.write();
        match entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.insert(Entry::new(Value::Hash(fields.clone()), None));
                    return Ok(());
                }
                match &mut occupied.get_mut().value {
                    Value::Hash(existing) => {
                        existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    Value::Str(_) => {
                        return Err(StoreError::WriteFailed(format!(
                            "{} holds a string, not a hash record",
                            key
                        )))
                    }
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Hash(fields.clone()), None));
            }
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<FieldMap, StoreError> {
        match self.live(key) {
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
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .map(|key| match entries.get(key) {
                Some(entry) if entry.is_live(now) => match &entry.value {
                    Value::Hash(fields) => fields.clone(),
                    Value::Str(_) => FieldMap::new(),
                },
                _ => FieldMap::new(),
            })
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.walk(None, pattern, None).0)
    }

    async fn scan(
        &self,
        cursor: Option<&str>,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, Option<String>), StoreError> {
        Ok(self.walk(cursor, pattern, Some(count.max(1))))
    }
}
