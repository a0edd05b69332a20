//! LRU Tracker Module
//!
//! Implements least-recently-used ordering for memory backend eviction.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

// == LRU Tracker ==
/// Tracks a last-access tick per key.
///
/// Every touch hands out a strictly increasing tick, so the smallest tick in
/// `order` always belongs to the least recently used key.
#[derive(Debug)]
pub struct LruTracker<K> {
    /// Last-access tick of each key
    ticks: HashMap<K, u64>,
    /// Keys ordered by last-access tick
    order: BTreeMap<u64, K>,
    /// Next tick to hand out
    clock: u64,
}

impl<K: Clone + Eq + Hash> LruTracker<K> {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self {
            ticks: HashMap::new(),
            order: BTreeMap::new(),
            clock: 0,
        }
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &K) {
        let tick = self.clock;
        self.clock += 1;

        if let Some(previous) = self.ticks.insert(key.clone(), tick) {
            self.order.remove(&previous);
        }
        self.order.insert(tick, key.clone());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &K) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl<K: Clone + Eq + Hash> Default for LruTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_lru_new() {
        let lru: LruTracker<String> = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_lru_touch_new_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.evict_oldest(), Some(key("key1")));
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        // key1 becomes most recent
        lru.touch(&key("key1"));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.evict_oldest(), Some(key("key2")));
    }

    #[test]
    fn test_lru_evict_oldest() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        assert_eq!(lru.evict_oldest(), Some(key("key1")));
        assert_eq!(lru.len(), 2);

        assert_eq!(lru.evict_oldest(), Some(key("key2")));
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some(key("key3")));
    }

    #[test]
    fn test_lru_evict_empty() {
        let mut lru: LruTracker<String> = LruTracker::new();
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_remove() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        lru.remove(&key("key2"));
        lru.remove(&key("nonexistent"));

        assert_eq!(lru.len(), 2);
        assert_eq!(lru.evict_oldest(), Some(key("key1")));
        assert_eq!(lru.evict_oldest(), Some(key("key3")));
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruTracker::new();

        lru.touch(&key("a"));
        lru.touch(&key("b"));
        lru.touch(&key("c"));

        // Access order a, c, b leaves a as the oldest
        lru.touch(&key("a"));
        lru.touch(&key("c"));
        lru.touch(&key("b"));

        assert_eq!(lru.evict_oldest(), Some(key("a")));
        assert_eq!(lru.evict_oldest(), Some(key("c")));
        assert_eq!(lru.evict_oldest(), Some(key("b")));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_touch_same_key_multiple_times() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key1"));
        lru.touch(&key("key1"));

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some(key("key1")));
        assert!(lru.is_empty());
    }
}
