//! LRU cache for chunk groups and chunk data (like libfcache)

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use tracing::trace;

/// Counters for cache activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of times a factory produced a value
    pub materializations: u64,
    pub evictions: u64,
}

/// Bounded cache with LRU eviction.
///
/// Values are handed out as `Arc<V>` so a caller keeps a valid handle even
/// after the entry is evicted by later cache activity. Population goes
/// through `&mut self`, which makes "materialize if absent" atomic with the
/// insert: at most one factory call per missing key. Callers sharing a cache
/// across threads wrap it in a single mutex.
pub struct Cache<K, V> {
    entries: HashMap<K, Arc<V>>,
    lru_queue: VecDeque<K>,
    max_entries: usize,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> Cache<K, V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        match self.entries.get(key) {
            Some(value) => {
                let value = Arc::clone(value);
                self.touch(key);
                self.stats.hits += 1;
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Return the cached value for `key`, or build it with `factory` and cache it.
    /// A failing factory leaves the cache untouched.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: K, factory: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = factory()?;
        self.stats.materializations += 1;
        Ok(self.insert(key, value))
    }

    /// Install `value` under `key`, replacing any existing entry
    pub fn insert(&mut self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);

        if self.entries.contains_key(&key) {
            self.touch(&key);
        } else {
            if self.entries.len() >= self.max_entries {
                if let Some(old_key) = self.lru_queue.pop_back() {
                    self.entries.remove(&old_key);
                    self.stats.evictions += 1;
                    trace!(entries = self.entries.len(), "Evicted least recently used cache entry");
                }
            }
            self.lru_queue.push_front(key.clone());
        }
        self.entries.insert(key, Arc::clone(&value));
        value
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let value = self.entries.remove(key)?;
        self.lru_queue.retain(|x| x != key);
        Some(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru_queue.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn touch(&mut self, key: &K) {
        self.lru_queue.retain(|x| x != key);
        self.lru_queue.push_front(key.clone());
    }
}
