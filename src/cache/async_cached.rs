//! Async Cache Controller Module
//!
//! The read-through algorithm of [`Cached`](crate::cache::Cached) for
//! computations that return futures. Backend calls run on tokio's blocking
//! pool so SQLite I/O never stalls the executor.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::cached::{CacheCore, CallContext};
use crate::cache::{Backend, CacheStats, InstanceKey, SharedBackend};
use crate::error::{CacheError, CallError, Result};

/// Runs one backend operation on the blocking pool.
async fn run_blocking<T, Op>(backend: SharedBackend, op: Op) -> Result<T>
where
    T: Send + 'static,
    Op: FnOnce(&dyn Backend) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(backend.as_ref()))
        .await
        .map_err(|err| CacheError::BackendUnavailable(format!("backend task failed: {}", err)))?
}

// == Async Cached ==
/// An async computation behind a read-through cache.
pub struct AsyncCached<I: ?Sized, A: ?Sized, R, E, F> {
    core: CacheCore<I, A>,
    compute: F,
    _output: PhantomData<fn() -> (R, E)>,
}

impl<I: ?Sized, A: ?Sized, R, E, F> AsyncCached<I, A, R, E, F> {
    pub(crate) fn new(core: CacheCore<I, A>, compute: F) -> Self {
        Self {
            core,
            compute,
            _output: PhantomData,
        }
    }

    pub fn scope(&self) -> &str {
        self.core.scope()
    }

    pub fn stats(&self) -> CacheStats {
        self.core.stats.snapshot()
    }

    /// Removes every entry of this computation from the backend resolved
    /// with an empty call context.
    pub async fn cache_clear(&self) -> Result<usize> {
        let backend = self.core.resolve(CallContext::empty())?;
        self.clear_in(backend).await
    }

    /// Removes every entry of this computation from the backend `instance`
    /// resolves to.
    pub async fn cache_clear_for(&self, instance: &I) -> Result<usize> {
        let backend = self.core.resolve(CallContext::for_instance(instance))?;
        self.clear_in(backend).await
    }

    async fn clear_in(&self, backend: SharedBackend) -> Result<usize> {
        let name = backend.name();
        let scope = self.core.scope().to_string();
        let removed = run_blocking(backend, move |b| b.clear(&scope)).await?;
        self.core.log_cleared(name, removed);
        Ok(removed)
    }
}

impl<I, A, R, E, F> AsyncCached<I, A, R, E, F>
where
    I: InstanceKey + ?Sized,
    A: Serialize + ?Sized,
    R: Serialize + DeserializeOwned,
{
    // == Call ==
    /// Returns the cached result for these arguments, awaiting the
    /// computation and storing its result on a miss.
    pub async fn call<Fut>(&self, instance: &I, args: &A) -> std::result::Result<R, CallError<E>>
    where
        F: Fn(&I, &A) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let core = &self.core;
        let key = core.deriver.derive(instance, args)?;

        let mut backend = match core.resolve(CallContext::for_call(instance, args)) {
            Ok(backend) => Some(backend),
            Err(err) => {
                core.tolerate(err)?;
                None
            }
        };

        if let Some(active) = backend.clone() {
            let name = active.name();
            let lookup_key = key.clone();
            match run_blocking(active, move |b| b.get(&lookup_key)).await {
                Ok(Some(entry)) => {
                    if let Some(value) = core.decode::<R>(&key, entry.value) {
                        core.stats.record_hit();
                        debug!(key = %key, backend = name, "cache hit");
                        return Ok(value);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    core.tolerate(err)?;
                    backend = None;
                }
            }
        }

        core.stats.record_miss();
        debug!(key = %key, "cache miss");

        let value = (self.compute)(instance, args).await.map_err(|err| {
            core.stats.record_failure();
            CallError::Compute(err)
        })?;

        let encoded = match backend {
            Some(active) => core.encode(&key, &value)?.map(|encoded| (active, encoded)),
            None => None,
        };

        if let Some((active, encoded)) = encoded {
            let name = active.name();
            let store_key = key.clone();
            let ttl = core.ttl;
            match run_blocking(active, move |b| b.put(&store_key, encoded, ttl)).await {
                Ok(()) => {
                    core.stats.record_store();
                    debug!(key = %key, backend = name, ttl = ?ttl, "cache store");
                }
                Err(err) => core.tolerate(err)?,
            }
        }

        Ok(value)
    }
}

impl<I: ?Sized, A: ?Sized, R, E, F> fmt::Debug for AsyncCached<I, A, R, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCached")
            .field("scope", &self.core.scope())
            .field("ttl", &self.core.ttl)
            .field("policy", &self.core.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cacheable, MemoryBackend, SqliteBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Flaky;

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky upstream")
        }
    }

    #[tokio::test]
    async fn test_async_miss_then_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend: SharedBackend = Arc::new(MemoryBackend::new(8).unwrap());

        let cached = Cacheable::new("async_square")
            .backend(backend)
            .wrap_async(move |_: &(), n: &u64| {
                let counter = Arc::clone(&counter);
                let n = *n;
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Flaky>(n * n)
                }
            })
            .unwrap();

        assert_eq!(cached.call(&(), &9).await.unwrap(), 81);
        assert_eq!(cached.call(&(), &9).await.unwrap(), 81);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_async_failure_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend: SharedBackend = Arc::new(MemoryBackend::new(8).unwrap());

        let cached = Cacheable::new("async_flaky")
            .backend(backend)
            .wrap_async(move |_: &(), _n: &u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(Flaky)
                }
            })
            .unwrap();

        assert!(matches!(cached.call(&(), &1).await, Err(CallError::Compute(Flaky))));
        assert!(matches!(cached.call(&(), &1).await, Err(CallError::Compute(Flaky))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_async_non_finite_result_is_not_stored() {
        let backend: SharedBackend = Arc::new(MemoryBackend::new(8).unwrap());

        let cached = Cacheable::new("async_inf")
            .backend(Arc::clone(&backend))
            .wrap_async(|_: &(), _n: &u32| async { Ok::<_, Flaky>(vec![1.0, f64::INFINITY]) })
            .unwrap();

        assert_eq!(cached.call(&(), &1).await.unwrap()[1], f64::INFINITY);
        assert_eq!(cached.call(&(), &1).await.unwrap()[1], f64::INFINITY);

        assert!(backend.is_empty().unwrap());
        assert_eq!(cached.stats().stores, 0);
    }

    #[tokio::test]
    async fn test_async_sqlite_clear() {
        let dir = TempDir::new().unwrap();
        let backend: SharedBackend =
            Arc::new(SqliteBackend::open(dir.path().join("async.sqlite")).unwrap());

        let cached = Cacheable::new("async_sqlite")
            .ttl(Duration::from_secs(60))
            .backend(Arc::clone(&backend))
            .wrap_async(|_: &(), s: &String| {
                let out = s.to_uppercase();
                async move { Ok::<_, Flaky>(out) }
            })
            .unwrap();

        assert_eq!(cached.call(&(), &"abc".to_string()).await.unwrap(), "ABC");
        assert_eq!(backend.len().unwrap(), 1);

        assert_eq!(cached.cache_clear().await.unwrap(), 1);
        assert!(backend.is_empty().unwrap());
    }
}
