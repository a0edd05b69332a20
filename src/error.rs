//! Error types for the memoization layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for key derivation, backends and configuration.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A call argument cannot be encoded into a stable key
    #[error("Unhashable argument: {0}")]
    UnhashableArgument(String),

    /// The storage backend could not be reached, opened or written
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Invalid TTL, capacity or environment configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A computed value could not be encoded for storage
    #[error("Codec error: {0}")]
    Codec(String),
}

impl CacheError {
    /// Creates a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an unhashable-argument error.
    pub fn unhashable<S: Into<String>>(msg: S) -> Self {
        Self::UnhashableArgument(msg.into())
    }

    /// Returns true for storage failures, the only kind the degraded policy
    /// is allowed to bypass.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, CacheError::BackendUnavailable(_))
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::BackendUnavailable(format!("sqlite: {err}"))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::BackendUnavailable(format!("io: {err}"))
    }
}

// == Call Error ==
/// Error returned by a wrapped computation's call.
///
/// Keeps cache failures apart from the computation's own error type, which
/// passes through unchanged.
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// Key derivation, backend or codec failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The wrapped computation itself failed; nothing was stored
    #[error("Computation failed: {0}")]
    Compute(E),
}

impl<E> CallError<E> {
    /// Returns the computation's error, if that is what failed.
    pub fn into_compute(self) -> Option<E> {
        match self {
            CallError::Compute(err) => Some(err),
            CallError::Cache(_) => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
