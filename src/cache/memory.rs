//! Memory Backend Module
//!
//! Volatile cache store combining a HashMap with LRU tracking and lazy TTL
//! expiration.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::cache::{Backend, CacheEntry, CacheKey, LruTracker};
use crate::error::{CacheError, Result};

// == Store State ==
#[derive(Debug, Default)]
struct MemoryState {
    /// Key-value storage
    entries: HashMap<CacheKey, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker<CacheKey>,
    /// Entries removed to make room
    evictions: u64,
}

impl MemoryState {
    fn remove(&mut self, key: &CacheKey) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    fn purge_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

// == Memory Backend ==
/// In-process store bounded by an entry count.
///
/// Every operation holds the table lock for its whole duration, so readers
/// and writers never observe a half-applied change.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` entries.
    ///
    /// A capacity of zero is a configuration error.
    pub fn new(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(CacheError::config("max_entries must be at least 1"));
        }
        Ok(Self {
            state: Mutex::new(MemoryState::default()),
            max_entries,
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Number of entries evicted to satisfy the capacity bound.
    pub fn evictions(&self) -> u64 {
        self.state.lock().evictions
    }

    /// Returns true if the key is stored, without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }
}

impl Backend for MemoryBackend {
    // == Get ==
    /// Returns a live entry and marks it most recently used.
    ///
    /// An expired entry is removed on the spot and reported as absent; it does
    /// not bump recency.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock();

        let entry = match state.entries.get(key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };

        if entry.is_expired() {
            state.remove(key);
            debug!(key = %key, "memory backend dropped expired entry");
            return Ok(None);
        }

        state.lru.touch(key);
        Ok(Some(entry))
    }

    // == Put ==
    /// Stores a value, replacing any previous entry and resetting its TTL.
    ///
    /// A new key at capacity first purges expired entries; if the table is
    /// still full, the least recently used entry is evicted.
    fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock();

        let is_overwrite = state.entries.contains_key(key);
        if !is_overwrite && state.entries.len() >= self.max_entries {
            let purged = state.purge_expired();
            if purged > 0 {
                debug!(purged, "memory backend purged expired entries");
            }
        }

        if !is_overwrite && state.entries.len() >= self.max_entries {
            match state.lru.evict_oldest() {
                Some(evicted) => {
                    state.entries.remove(&evicted);
                    state.evictions += 1;
                    debug!(key = %evicted, "memory backend evicted least recently used entry");
                }
                None => {
                    return Err(CacheError::BackendUnavailable(
                        "memory backend is full and has nothing to evict".to_string(),
                    ));
                }
            }
        }

        state.entries.insert(key.clone(), CacheEntry::new(value, ttl));
        state.lru.touch(key);
        Ok(())
    }

    // == Delete ==
    fn delete(&self, key: &CacheKey) -> Result<()> {
        self.state.lock().remove(key);
        Ok(())
    }

    // == Clear ==
    fn clear(&self, scope: &str) -> Result<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.in_scope(scope))
            .cloned()
            .collect();

        for key in &doomed {
            state.remove(key);
        }
        Ok(doomed.len())
    }

    // == Purge Expired ==
    fn purge_expired(&self) -> Result<usize> {
        Ok(self.state.lock().purge_expired())
    }

    // == Length ==
    fn len(&self) -> Result<usize> {
        Ok(self.state.lock().entries.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread::sleep;

    const LONG: Duration = Duration::from_secs(300);

    fn key(name: &str) -> CacheKey {
        CacheKey::new("scope", name)
    }

    #[test]
    fn test_backend_new() {
        let backend = MemoryBackend::new(100).unwrap();
        assert_eq!(backend.len().unwrap(), 0);
        assert!(backend.is_empty().unwrap());
        assert_eq!(backend.capacity(), 100);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            MemoryBackend::new(0),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_put_and_get() {
        let backend = MemoryBackend::new(100).unwrap();

        backend.put(&key("key1"), json!("value1"), LONG).unwrap();
        let entry = backend.get(&key("key1")).unwrap().unwrap();

        assert_eq!(entry.value, json!("value1"));
        assert_eq!(entry.ttl, LONG);
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let backend = MemoryBackend::new(100).unwrap();
        assert!(backend.get(&key("nonexistent")).unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let backend = MemoryBackend::new(100).unwrap();

        backend.put(&key("key1"), json!(1), LONG).unwrap();
        backend.delete(&key("key1")).unwrap();
        backend.delete(&key("key1")).unwrap();

        assert!(backend.is_empty().unwrap());
        assert!(backend.get(&key("key1")).unwrap().is_none());
    }

    #[test]
    fn test_overwrite_resets_ttl() {
        let backend = MemoryBackend::new(100).unwrap();

        backend
            .put(&key("key1"), json!("value1"), Duration::from_millis(50))
            .unwrap();
        backend.put(&key("key1"), json!("value2"), LONG).unwrap();

        sleep(Duration::from_millis(100));

        let entry = backend.get(&key("key1")).unwrap().unwrap();
        assert_eq!(entry.value, json!("value2"));
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_ttl_expiration_removes_entry() {
        let backend = MemoryBackend::new(100).unwrap();

        backend
            .put(&key("key1"), json!(1), Duration::from_millis(50))
            .unwrap();
        assert!(backend.get(&key("key1")).unwrap().is_some());

        sleep(Duration::from_millis(100));

        assert!(backend.get(&key("key1")).unwrap().is_none());
        assert!(!backend.contains(&key("key1")));
    }

    #[test]
    fn test_lru_eviction() {
        let backend = MemoryBackend::new(2).unwrap();

        backend.put(&key("k1"), json!(1), LONG).unwrap();
        backend.put(&key("k2"), json!(2), LONG).unwrap();
        backend.put(&key("k3"), json!(3), LONG).unwrap();

        assert_eq!(backend.len().unwrap(), 2);
        assert_eq!(backend.evictions(), 1);
        assert!(backend.get(&key("k1")).unwrap().is_none());
        assert!(backend.get(&key("k2")).unwrap().is_some());
        assert!(backend.get(&key("k3")).unwrap().is_some());
    }

    #[test]
    fn test_lru_touch_on_get() {
        let backend = MemoryBackend::new(3).unwrap();

        backend.put(&key("key1"), json!(1), LONG).unwrap();
        backend.put(&key("key2"), json!(2), LONG).unwrap();
        backend.put(&key("key3"), json!(3), LONG).unwrap();

        // key1 becomes most recently used
        backend.get(&key("key1")).unwrap();

        backend.put(&key("key4"), json!(4), LONG).unwrap();

        assert!(backend.contains(&key("key1")));
        assert!(!backend.contains(&key("key2")));
    }

    #[test]
    fn test_miss_does_not_bump_recency() {
        let backend = MemoryBackend::new(2).unwrap();

        backend.put(&key("a"), json!(1), LONG).unwrap();
        backend.put(&key("b"), json!(2), LONG).unwrap();
        backend.get(&key("missing")).unwrap();
        backend.put(&key("c"), json!(3), LONG).unwrap();

        assert!(!backend.contains(&key("a")));
        assert!(backend.contains(&key("b")));
    }

    #[test]
    fn test_expired_entries_make_room_before_eviction() {
        let backend = MemoryBackend::new(2).unwrap();

        backend.put(&key("live"), json!(1), LONG).unwrap();
        backend
            .put(&key("short"), json!(2), Duration::from_millis(20))
            .unwrap();
        sleep(Duration::from_millis(50));

        backend.put(&key("new"), json!(3), LONG).unwrap();

        assert!(backend.contains(&key("live")));
        assert!(backend.contains(&key("new")));
        assert_eq!(backend.evictions(), 0);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let backend = MemoryBackend::new(2).unwrap();

        backend.put(&key("a"), json!(1), LONG).unwrap();
        backend.put(&key("b"), json!(2), LONG).unwrap();
        backend.put(&key("a"), json!(10), LONG).unwrap();

        assert_eq!(backend.evictions(), 0);
        assert_eq!(backend.len().unwrap(), 2);
    }

    #[test]
    fn test_clear_only_touches_scope() {
        let backend = MemoryBackend::new(10).unwrap();

        backend.put(&CacheKey::new("left", "1"), json!(1), LONG).unwrap();
        backend.put(&CacheKey::new("left", "2"), json!(2), LONG).unwrap();
        backend.put(&CacheKey::new("right", "1"), json!(3), LONG).unwrap();

        assert_eq!(backend.clear("left").unwrap(), 2);
        assert_eq!(backend.len().unwrap(), 1);
        assert!(backend.get(&CacheKey::new("right", "1")).unwrap().is_some());
        assert_eq!(backend.clear("missing").unwrap(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let backend = MemoryBackend::new(10).unwrap();

        backend
            .put(&key("key1"), json!(1), Duration::from_millis(20))
            .unwrap();
        backend.put(&key("key2"), json!(2), LONG).unwrap();

        sleep(Duration::from_millis(50));

        assert_eq!(backend.purge_expired().unwrap(), 1);
        assert_eq!(backend.len().unwrap(), 1);
        assert!(backend.get(&key("key2")).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let backend = Arc::new(MemoryBackend::new(16).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let k = CacheKey::new("threads", format!("{}-{}", t, i % 32));
                        backend.put(&k, json!(i), LONG).unwrap();
                        let _ = backend.get(&k).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(backend.len().unwrap() <= 16);
    }
}
