//! Storage Backend Module
//!
//! The contract every cache store satisfies, whether it lives in process
//! memory or on disk.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{CacheEntry, CacheKey};
use crate::error::Result;

/// A cache store shared between callers and threads.
///
/// Every operation is atomic with respect to the store's own state. None of
/// them serialize the computation that produces a value: two callers missing
/// the same key may both compute and both `put`.
pub trait Backend: Send + Sync {
    /// Returns the entry for `key` only while it is live.
    ///
    /// Expired entries are never returned; a backend may purge them here.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Inserts or replaces the entry, resetting its store time to now.
    fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<()>;

    /// Removes the entry if present.
    fn delete(&self, key: &CacheKey) -> Result<()>;

    /// Removes every entry of `scope` and returns how many were removed.
    fn clear(&self, scope: &str) -> Result<usize>;

    /// Physically removes expired entries and returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;

    /// Number of stored entries, including expired ones not yet purged.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Short label used in log lines.
    fn name(&self) -> &'static str;
}

/// Handle the controller resolves on every call.
pub type SharedBackend = Arc<dyn Backend>;
