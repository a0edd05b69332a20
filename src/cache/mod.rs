//! Cache Module
//!
//! Read-through memoization with TTL expiration, LRU eviction and
//! interchangeable memory and SQLite backends.

mod async_cached;
mod backend;
mod cached;
mod canonical;
mod entry;
mod key;
mod lru;
mod memory;
mod sqlite;
mod stats;


// Re-export public types
pub use async_cached::AsyncCached;
pub use backend::{Backend, SharedBackend};
pub use cached::{BackendFactory, CallContext, Cacheable, Cached, DEFAULT_TTL};
pub use entry::CacheEntry;
pub use key::{CacheKey, CallArgs, InstanceKey, KeyDeriver};
pub use lru::LruTracker;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use stats::CacheStats;
