//! Short-lived in-memory caching for lookups.
//!
//! Entries expire after a fixed time-to-live. Expired entries are ignored on
//! read and dropped on the next insert.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A map whose entries expire after a fixed TTL.
///
/// Cloning is cheap; clones share entries.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<K, Entry<V>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the cached value if it has not expired.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    #[must_use]
    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    pub fn insert_at(&self, key: K, value: V, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| self.is_fresh(entry, now));
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|key, entry| keep(key, &entry.value));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        // An entry stamped in the future (clock moved back) counts as fresh.
        (now - entry.inserted_at)
            .to_std()
            .map_or(true, |age| age < self.ttl)
    }
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            entries: Arc::clone(&self.entries),
        }
    }
}
