//! SQLite Backend Module
//!
//! Durable cache store in a single SQLite file. Rows outlive the process and
//! can be shared by several processes opening the same file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::entry::{current_timestamp_micros, duration_to_micros, from_timestamp_micros};
use crate::cache::{Backend, CacheEntry, CacheKey};
use crate::error::{CacheError, Result};

/// How long a writer waits for another connection's lock before failing.
const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        scope TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        stored_at INTEGER NOT NULL,
        ttl INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (scope, key)
    );

    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
"#;

/// Persistent store backed by one SQLite file.
///
/// The connection is the only in-process state: every `get` and `put` goes to
/// the file. WAL journaling lets readers run alongside a writer, and writers
/// from other connections wait up to [`BUSY_TIMEOUT`] for the write lock.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Opens the store at `path`, creating the file and its parent
    /// directories if they do not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode returns the resulting mode as a row
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), journal_mode = %mode, "opened sqlite cache store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Location of the store file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Backend for SqliteBackend {
    /// Reads the row and checks it against the current time.
    ///
    /// Expired rows are reported as absent but left in place; they are
    /// overwritten by the next `put` or removed by [`Backend::purge_expired`].
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT value, stored_at, ttl, expires_at FROM cache_entries
                 WHERE scope = ?1 AND key = ?2",
                params![key.scope, key.digest],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((raw, stored_at, ttl, expires_at)) = row else {
            return Ok(None);
        };

        if current_timestamp_micros() >= expires_at {
            debug!(key = %key, "sqlite row expired");
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            CacheError::BackendUnavailable(format!("corrupt row for {}: {}", key, err))
        })?;

        Ok(Some(CacheEntry::stored_at(
            value,
            from_timestamp_micros(stored_at),
            StdDuration::from_micros(ttl.max(0) as u64),
        )))
    }

    /// Upserts the row, replacing value, store time and TTL.
    fn put(&self, key: &CacheKey, value: Value, ttl: StdDuration) -> Result<()> {
        let raw = serde_json::to_string(&value).map_err(|err| CacheError::Codec(err.to_string()))?;
        let stored_at = current_timestamp_micros();
        let ttl_micros = duration_to_micros(ttl);
        let expires_at = stored_at.saturating_add(ttl_micros);

        self.conn.lock().execute(
            "INSERT INTO cache_entries (scope, key, value, stored_at, ttl, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(scope, key) DO UPDATE SET
                value = excluded.value,
                stored_at = excluded.stored_at,
                ttl = excluded.ttl,
                expires_at = excluded.expires_at",
            params![key.scope, key.digest, raw, stored_at, ttl_micros, expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM cache_entries WHERE scope = ?1 AND key = ?2",
            params![key.scope, key.digest],
        )?;
        Ok(())
    }

    fn clear(&self, scope: &str) -> Result<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE scope = ?1", params![scope])?;
        Ok(removed)
    }

    fn purge_expired(&self) -> Result<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![current_timestamp_micros()],
        )?;
        if removed > 0 {
            debug!(removed, "sqlite backend purged expired rows");
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
