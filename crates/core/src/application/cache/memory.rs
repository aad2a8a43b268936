// Process-local cache store
// Expired entries are purged lazily on read or by an explicit sweep

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::CacheEntry;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for `key`; an expired one is removed and reads as absent
    pub fn get(&self, key: &str, now_millis: i64) -> Option<CacheEntry> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now_millis) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check: a concurrent set may have refreshed it
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_millis))
        {
            entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: String, entry: CacheEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Remove every key accepted by `matches`
    pub fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !matches(key));
        before - entries.len()
    }

    pub fn purge_expired(&self, now_millis: i64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_millis));
        before - entries.len()
    }

    /// (key, expired) for every stored entry
    pub fn snapshot(&self, now_millis: i64) -> Vec<(String, bool)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, entry)| (key.clone(), entry.is_expired(now_millis)))
            .collect()
    }
}
