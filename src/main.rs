//! cacheable-bench - Miss and hit timings for the memory and SQLite backends
//!
//! Computes π with the Nilakantha series, tuned to take about 0.4 s, and
//! compares the uncached call with cached misses and hits.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::task::JoinError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cacheable::{AsyncCached, Cacheable, Config, InstanceKey, MemoryBackend, SharedBackend, SqliteBackend};

/// Target duration of one uncached computation.
const TARGET_SECS: f64 = 0.4;
const HIT_REPEATS: usize = 5;
const MAX_ITERATIONS: u64 = 50_000_000;

fn pi_nilakantha(iterations: u64) -> f64 {
    let mut pi = 3.0;
    let mut sign = 1.0;
    let mut a = 2.0;
    for _ in 0..iterations {
        pi += sign * 4.0 / (a * (a + 1.0) * (a + 2.0));
        sign = -sign;
        a += 2.0;
    }
    pi
}

/// Grows or shrinks the iteration count until one run lands within 25% of
/// `target_secs`.
fn autotune_iterations(target_secs: f64) -> u64 {
    let mut guess: u64 = 300_000;
    loop {
        let started = Instant::now();
        std::hint::black_box(pi_nilakantha(std::hint::black_box(guess)));
        let elapsed = started.elapsed().as_secs_f64();

        if (elapsed - target_secs).abs() / target_secs < 0.25 || guess > MAX_ITERATIONS {
            return guess;
        }
        let ratio = target_secs / elapsed.max(1e-9);
        guess = ((guess as f64) * (0.5 + ratio.min(3.0))) as u64;
    }
}

// == Pi Service ==
/// Owns the backend its cached method stores into.
struct PiService {
    name: &'static str,
    calls: AtomicUsize,
    backend: SharedBackend,
}

impl PiService {
    fn new(name: &'static str, backend: SharedBackend) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
            backend,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InstanceKey for PiService {
    fn instance_key(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.name))
    }
}

// == Timing ==
struct Timing {
    value: f64,
    miss: Duration,
    hit_median: Duration,
}

impl Timing {
    fn speedup(&self) -> f64 {
        self.miss.as_secs_f64() / self.hit_median.as_secs_f64().max(1e-9)
    }
}

/// Clears the service's entries, then times one miss and the median of
/// several hits.
async fn time_service<F, Fut>(
    compute_pi: &AsyncCached<PiService, u64, f64, JoinError, F>,
    service: &PiService,
    iterations: u64,
) -> anyhow::Result<Timing>
where
    F: Fn(&PiService, &u64) -> Fut,
    Fut: std::future::Future<Output = Result<f64, JoinError>>,
{
    let cleared = compute_pi.cache_clear_for(service).await?;
    info!(service = service.name, cleared, "starting timed run");

    let started = Instant::now();
    let value = compute_pi.call(service, &iterations).await?;
    let miss = started.elapsed();

    let mut hits = Vec::with_capacity(HIT_REPEATS);
    for _ in 0..HIT_REPEATS {
        let started = Instant::now();
        compute_pi.call(service, &iterations).await?;
        hits.push(started.elapsed());
    }
    hits.sort();

    Ok(Timing {
        value,
        miss,
        hit_median: hits[hits.len() / 2],
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cacheable=info,cacheable_bench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: max_entries={}, ttl={}s, db_path={}, policy={:?}",
        config.max_entries,
        config.ttl_secs,
        config.db_path.display(),
        config.failure_policy
    );

    let memory: SharedBackend = Arc::new(MemoryBackend::new(config.max_entries)?);
    let disk: SharedBackend = Arc::new(
        SqliteBackend::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );

    let compute_pi = Cacheable::new("compute_pi")
        .ttl(config.ttl()?)
        .failure_policy(config.failure_policy)
        .backend_for_instance(|service: &PiService| Arc::clone(&service.backend))
        .wrap_async(|service: &PiService, iterations: &u64| {
            service.calls.fetch_add(1, Ordering::SeqCst);
            let iterations = *iterations;
            async move { tokio::task::spawn_blocking(move || pi_nilakantha(iterations)).await }
        })?;

    let iterations = tokio::task::spawn_blocking(|| autotune_iterations(TARGET_SECS)).await?;
    info!(iterations, "autotuned series length");

    let started = Instant::now();
    let raw_value = tokio::task::spawn_blocking(move || pi_nilakantha(iterations)).await?;
    let raw = started.elapsed();

    let svc_memory = PiService::new("memory", memory);
    let svc_disk = PiService::new("sqlite", disk);

    let mem = time_service(&compute_pi, &svc_memory, iterations).await?;
    let sql = time_service(&compute_pi, &svc_disk, iterations).await?;

    anyhow::ensure!(
        mem.value == raw_value && sql.value == raw_value,
        "cached value differs from the uncached computation"
    );

    println!("\nITER={} | pi~{:.12}\n", iterations, raw_value);
    println!("Backend     MISS (s)   HIT_med (s)   Speedup(HIT/MISS)   Calls");
    println!("----------- ---------- ------------- ------------------- ------");
    println!("Raw         {:10.4}    -                 -                 -", raw.as_secs_f64());
    println!(
        "Memory      {:10.4} {:13.6} {:19.1} {:6}",
        mem.miss.as_secs_f64(),
        mem.hit_median.as_secs_f64(),
        mem.speedup(),
        svc_memory.calls()
    );
    println!(
        "SQLite      {:10.4} {:13.6} {:19.1} {:6}",
        sql.miss.as_secs_f64(),
        sql.hit_median.as_secs_f64(),
        sql.speedup(),
        svc_disk.calls()
    );

    info!(stats = ?compute_pi.stats(), "benchmark finished");
    Ok(())
}
