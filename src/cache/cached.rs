//! Cache Controller Module
//!
//! Wraps a computation so repeated calls with equal arguments are answered
//! from a backend until the stored result's TTL runs out.
//!
//! # Example
//! ```ignore
//! let backend: SharedBackend = Arc::new(MemoryBackend::new(256)?);
//! let square = Cacheable::new("square")
//!     .ttl(Duration::from_secs(60))
//!     .backend(backend)
//!     .wrap(|_: &(), n: &u64| Ok::<_, Infallible>(n * n))?;
//!
//! assert_eq!(square.call(&(), &12)?, 144); // computed
//! assert_eq!(square.call(&(), &12)?, 144); // served from the backend
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::canonical;
use crate::cache::stats::StatsRecorder;
use crate::cache::{AsyncCached, Backend, CacheKey, CacheStats, InstanceKey, KeyDeriver, SharedBackend};
use crate::config::{ttl_from_secs, FailurePolicy};
use crate::error::{CacheError, CallError, Result};

/// TTL used when a wrapper is built without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

// == Call Context ==
/// What a backend factory sees of the call it resolves a backend for.
///
/// Both fields are `None` when the backend is resolved for `cache_clear`.
pub struct CallContext<'a, I: ?Sized, A: ?Sized> {
    pub instance: Option<&'a I>,
    pub args: Option<&'a A>,
}

impl<'a, I: ?Sized, A: ?Sized> CallContext<'a, I, A> {
    pub fn for_call(instance: &'a I, args: &'a A) -> Self {
        Self {
            instance: Some(instance),
            args: Some(args),
        }
    }

    pub fn for_instance(instance: &'a I) -> Self {
        Self {
            instance: Some(instance),
            args: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            instance: None,
            args: None,
        }
    }
}

/// Resolves the backend for one call.
pub type BackendFactory<I, A> =
    Arc<dyn for<'a> Fn(CallContext<'a, I, A>) -> Result<SharedBackend> + Send + Sync>;

// == Builder ==
/// Options of a wrapped computation: scope name, TTL, backend selection and
/// failure policy.
pub struct Cacheable<I: ?Sized, A: ?Sized> {
    scope: String,
    ttl: Duration,
    factory: Option<BackendFactory<I, A>>,
    policy: FailurePolicy,
}

impl<I: ?Sized, A: ?Sized> Cacheable<I, A> {
    /// Starts a wrapper whose entries are grouped under `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ttl: DEFAULT_TTL,
            factory: None,
            policy: FailurePolicy::default(),
        }
    }

    /// How long each computed result stays live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the TTL from fractional seconds, rejecting negative values.
    pub fn ttl_secs(mut self, secs: f64) -> Result<Self> {
        self.ttl = ttl_from_secs(secs)?;
        Ok(self)
    }

    /// Uses one backend for every call.
    pub fn backend(self, backend: SharedBackend) -> Self
    where
        I: 'static,
        A: 'static,
    {
        self.backend_factory(move |_ctx| Ok(Arc::clone(&backend)))
    }

    /// Resolves the backend from the bound instance on every call.
    ///
    /// `cache_clear()` has no instance to offer such a factory and fails;
    /// use `cache_clear_for` instead.
    pub fn backend_for_instance<F>(self, select: F) -> Self
    where
        F: Fn(&I) -> SharedBackend + Send + Sync + 'static,
        I: 'static,
        A: 'static,
    {
        self.backend_factory(move |ctx| match ctx.instance {
            Some(instance) => Ok(select(instance)),
            None => Err(CacheError::config(
                "backend is selected per instance; call cache_clear_for(instance)",
            )),
        })
    }

    /// Resolves the backend from the full call context on every call.
    pub fn backend_factory<F>(mut self, factory: F) -> Self
    where
        F: for<'a> Fn(CallContext<'a, I, A>) -> Result<SharedBackend> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wraps a synchronous computation.
    pub fn wrap<R, E, F>(self, compute: F) -> Result<Cached<I, A, R, E, F>>
    where
        F: Fn(&I, &A) -> std::result::Result<R, E>,
    {
        Ok(Cached {
            core: self.into_core()?,
            compute,
            _output: PhantomData,
        })
    }

    /// Wraps a computation returning a future.
    pub fn wrap_async<R, E, F, Fut>(self, compute: F) -> Result<AsyncCached<I, A, R, E, F>>
    where
        F: Fn(&I, &A) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<R, E>>,
    {
        Ok(AsyncCached::new(self.into_core()?, compute))
    }

    fn into_core(self) -> Result<CacheCore<I, A>> {
        let factory = self.factory.ok_or_else(|| {
            CacheError::config(format!("no backend configured for '{}'", self.scope))
        })?;
        Ok(CacheCore {
            deriver: KeyDeriver::new(self.scope)?,
            ttl: self.ttl,
            factory,
            policy: self.policy,
            stats: StatsRecorder::default(),
        })
    }
}

// == Shared Core ==
/// State and steps common to the sync and async wrappers.
pub(crate) struct CacheCore<I: ?Sized, A: ?Sized> {
    pub(crate) deriver: KeyDeriver,
    pub(crate) ttl: Duration,
    factory: BackendFactory<I, A>,
    pub(crate) policy: FailurePolicy,
    pub(crate) stats: StatsRecorder,
}

impl<I: ?Sized, A: ?Sized> CacheCore<I, A> {
    pub(crate) fn scope(&self) -> &str {
        self.deriver.scope()
    }

    pub(crate) fn resolve(&self, ctx: CallContext<'_, I, A>) -> Result<SharedBackend> {
        (self.factory)(ctx)
    }

    /// Swallows backend failures under the degraded policy.
    ///
    /// Returns the error back when it must reach the caller.
    pub(crate) fn tolerate(&self, err: CacheError) -> Result<()> {
        if self.policy == FailurePolicy::Degraded && err.is_backend_failure() {
            warn!(scope = %self.scope(), error = %err, "cache backend failed, calling through");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Decodes a live entry, treating values of a different shape as a miss.
    pub(crate) fn decode<R: DeserializeOwned>(&self, key: &CacheKey, value: Value) -> Option<R> {
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(key = %key, error = %err, "stored value does not decode, recomputing");
                None
            }
        }
    }

    /// Converts a result into its stored form.
    ///
    /// Returns `None` for results JSON cannot hold faithfully, such as
    /// non-finite floats, which would otherwise be stored as `null`.
    pub(crate) fn encode<R: Serialize>(&self, key: &CacheKey, value: &R) -> Result<Option<Value>> {
        if let Err(err) = canonical::encode(value) {
            warn!(key = %key, error = %err, "result has no faithful stored form, not caching");
            return Ok(None);
        }
        serde_json::to_value(value).map(Some).map_err(|err| {
            CacheError::Codec(format!("result of '{}' cannot be stored: {}", self.scope(), err))
        })
    }

    pub(crate) fn lookup<R: DeserializeOwned>(
        &self,
        backend: &dyn Backend,
        key: &CacheKey,
    ) -> Result<Option<R>> {
        Ok(backend
            .get(key)?
            .and_then(|entry| self.decode(key, entry.value)))
    }

    pub(crate) fn log_cleared(&self, backend: &str, removed: usize) {
        info!(scope = %self.scope(), backend, removed, "cache cleared");
    }
}

// == Cached ==
/// A synchronous computation behind a read-through cache.
pub struct Cached<I: ?Sized, A: ?Sized, R, E, F> {
    core: CacheCore<I, A>,
    compute: F,
    _output: PhantomData<fn() -> (R, E)>,
}

impl<I, A, R, E, F> Cached<I, A, R, E, F>
where
    I: InstanceKey + ?Sized,
    A: Serialize + ?Sized,
    R: Serialize + DeserializeOwned,
    F: Fn(&I, &A) -> std::result::Result<R, E>,
{
    // == Call ==
    /// Returns the cached result for these arguments, computing and storing
    /// it on a miss.
    ///
    /// A failing computation stores nothing. Backend failures propagate
    /// under the strict policy and are bypassed under the degraded one.
    pub fn call(&self, instance: &I, args: &A) -> std::result::Result<R, CallError<E>> {
        let core = &self.core;
        let key = core.deriver.derive(instance, args)?;

        let mut backend = match core.resolve(CallContext::for_call(instance, args)) {
            Ok(backend) => Some(backend),
            Err(err) => {
                core.tolerate(err)?;
                None
            }
        };

        if let Some(active) = &backend {
            match core.lookup::<R>(active.as_ref(), &key) {
                Ok(Some(value)) => {
                    core.stats.record_hit();
                    debug!(key = %key, backend = active.name(), "cache hit");
                    return Ok(value);
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

        let value = (self.compute)(instance, args).map_err(|err| {
            core.stats.record_failure();
            CallError::Compute(err)
        })?;

        if let Some(active) = backend {
            if let Some(encoded) = core.encode(&key, &value)? {
                match active.put(&key, encoded, core.ttl) {
                    Ok(()) => {
                        core.stats.record_store();
                        debug!(key = %key, backend = active.name(), ttl = ?core.ttl, "cache store");
                    }
                    Err(err) => core.tolerate(err)?,
                }
            }
        }

        Ok(value)
    }

    // == Invalidate ==
    /// Removes the stored result for one call, if any.
    pub fn invalidate(&self, instance: &I, args: &A) -> Result<()> {
        let key = self.core.deriver.derive(instance, args)?;
        self.core
            .resolve(CallContext::for_call(instance, args))?
            .delete(&key)
    }

    // == Clear ==
    /// Removes every entry of this computation from the backend resolved
    /// with an empty call context.
    pub fn cache_clear(&self) -> Result<usize> {
        let backend = self.core.resolve(CallContext::empty())?;
        let removed = backend.clear(self.core.scope())?;
        self.core.log_cleared(backend.name(), removed);
        Ok(removed)
    }

    /// Removes every entry of this computation from the backend `instance`
    /// resolves to, including entries of other instances sharing it.
    pub fn cache_clear_for(&self, instance: &I) -> Result<usize> {
        let backend = self.core.resolve(CallContext::for_instance(instance))?;
        let removed = backend.clear(self.core.scope())?;
        self.core.log_cleared(backend.name(), removed);
        Ok(removed)
    }
}

impl<I: ?Sized, A: ?Sized, R, E, F> Cached<I, A, R, E, F> {
    pub fn scope(&self) -> &str {
        self.core.scope()
    }

    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.core.policy
    }

    pub fn stats(&self) -> CacheStats {
        self.core.stats.snapshot()
    }
}

impl<I: ?Sized, A: ?Sized, R, E, F> fmt::Debug for Cached<I, A, R, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("scope", &self.core.scope())
            .field("ttl", &self.core.ttl)
            .field("policy", &self.core.policy)
            .finish_non_exhaustive()
    }
}
