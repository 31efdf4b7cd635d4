use moka::sync::Cache;

use crate::Timestamp;
use crate::key::CacheKey;
use crate::value::Value;

#[derive(Clone)]
struct MemEntry {
    ts: Timestamp,
    value: Value,
}

/// In-memory cache tier.
///
/// An unbounded table; nothing is ever evicted. Entries appear only when a
/// value is stored and disappear only when a `volatile` store removes them.
pub struct MemoryStore {
    cache: Cache<CacheKey, MemEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> MemoryStore {
        MemoryStore {
            cache: Cache::builder().build(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<(Timestamp, Value)> {
        self.cache.get(key).map(|e| (e.ts, e.value))
    }

    pub fn set(&self, key: CacheKey, ts: Timestamp, value: Value) {
        self.cache.insert(key, MemEntry { ts, value });
    }

    pub fn remove(&self, key: &CacheKey) {
        self.cache.remove(key);
    }

    #[must_use]
    pub fn mtime(&self, key: &CacheKey) -> Option<Timestamp> {
        self.cache.get(key).map(|e| e.ts)
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}
