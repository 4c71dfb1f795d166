//! # Cache: Stale-While-Revalidate Response Cache
//!
//! Responses are filed under the full parameter tuple that produced them, so
//! switching back to a filter/page combination seen before shows its last
//! known rows immediately while a fresh fetch runs.
//!
//! Each entry remembers the request generation that produced it. A response
//! only replaces an entry when it is at least as new, which keeps a slow,
//! older request from overwriting what a faster, newer one already stored.
//!
//! The cache is bounded: once `capacity` keys are held, the least recently
//! written key is evicted.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub generation: u64,
    pub fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

#[derive(Debug)]
pub struct SwrCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> Default for SwrCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<K, V> SwrCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Self {
        SwrCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut CacheEntry<V>> {
        self.entries.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store `value` for `key` unless the entry already holds a newer generation.
    /// Returns whether the value was stored.
    pub fn insert(&mut self, key: K, value: V, generation: u64) -> bool {
        if let Some(existing) = self.entries.get(&key) {
            if existing.generation > generation {
                return false;
            }
        }
        self.order.retain(|k| k != &key);
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                generation,
                fetched_at: Instant::now(),
            },
        );
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        true
    }

    /// Drop every entry whose key matches `stale`.
    pub fn invalidate(&mut self, stale: impl Fn(&K) -> bool) {
        self.entries.retain(|k, _| !stale(k));
        self.order.retain(|k| !stale(k));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
