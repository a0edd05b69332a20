//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

// == Failure Policy ==
/// What a wrapped computation does when its backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Backend errors propagate to the caller
    #[default]
    Strict,
    /// Backend errors are logged and the computation runs uncached
    Degraded,
}

impl FromStr for FailurePolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(FailurePolicy::Strict),
            "degraded" => Ok(FailurePolicy::Degraded),
            other => Err(CacheError::config(format!(
                "unknown failure policy '{}', expected 'strict' or 'degraded'",
                other
            ))),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries a memory backend can hold
    pub max_entries: usize,
    /// TTL in seconds applied to computed entries
    pub ttl_secs: f64,
    /// Location of the SQLite store file
    pub db_path: PathBuf,
    /// Backend failure handling
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHEABLE_MAX_ENTRIES` - Memory backend capacity (default: 256)
    /// - `CACHEABLE_TTL_SECS` - Entry TTL in seconds (default: 60)
    /// - `CACHEABLE_DB_PATH` - SQLite file (default: ./benchmarks/.cache/bench_pi.sqlite)
    /// - `CACHEABLE_FAILURE_POLICY` - `strict` or `degraded` (default: strict)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env::var("CACHEABLE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_entries),
            ttl_secs: env::var("CACHEABLE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ttl_secs),
            db_path: env::var("CACHEABLE_DB_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            failure_policy: env::var("CACHEABLE_FAILURE_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_policy),
        }
    }

    /// Rejects zero capacity and negative or non-finite TTLs.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::config("max_entries must be at least 1"));
        }
        ttl_from_secs(self.ttl_secs)?;
        Ok(())
    }

    /// Returns the configured TTL as a Duration.
    pub fn ttl(&self) -> Result<Duration> {
        ttl_from_secs(self.ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 256,
            ttl_secs: 60.0,
            db_path: PathBuf::from("./benchmarks/.cache/bench_pi.sqlite"),
            failure_policy: FailurePolicy::Strict,
        }
    }
}

/// Converts fractional seconds into a TTL.
pub fn ttl_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(CacheError::config(format!(
            "ttl must be a finite, non-negative number of seconds (got {})",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| {
        CacheError::config(format!("ttl of {} seconds is out of range: {}", secs, err))
    })
}
