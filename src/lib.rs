//! cacheable - Read-through memoization for expensive functions
//!
//! Stores computed results keyed by their arguments, with TTL expiration,
//! LRU eviction in memory and a durable SQLite backend.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    AsyncCached, Backend, BackendFactory, CacheEntry, CacheKey, CacheStats, Cacheable, Cached,
    CallArgs, CallContext, InstanceKey, KeyDeriver, MemoryBackend, SharedBackend, SqliteBackend,
    DEFAULT_TTL,
};
pub use config::{Config, FailurePolicy};
pub use error::{CacheError, CallError, Result};
