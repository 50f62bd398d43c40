//! # Store Benchmark Harness
//!
//! Purpose: Drive lock contention and ranked-set updates against the
//! in-memory store so throughput and acquisition rates can be compared over
//! time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each thread uses a fixed PRNG seed.
//! 2. **Allocation Control**: Pre-build keys and owner values off the hot path.
//! 3. **Realistic Locking**: Acquire with set-if-absent + TTL and release with
//!    the compare-and-delete script, exactly as the lock manager does.
//!
//! Usage: `bench_store [threads] [ops_per_thread] [lock_keys] [members]`

use std::env;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use ckv_common::{Order, Script, ScriptReply, Store};
use ckv_engine::MemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_THREADS: usize = 4;
const DEFAULT_OPS_PER_THREAD: usize = 200_000;
const DEFAULT_LOCK_KEYS: usize = 16;
const DEFAULT_MEMBERS: usize = 1024;
const LOCK_TTL: Duration = Duration::from_secs(30);

struct BenchConfig {
    threads: usize,
    ops_per_thread: usize,
    lock_keys: usize,
    members: usize,
}

impl BenchConfig {
    fn from_args() -> anyhow::Result<Self> {
        let mut args = env::args().skip(1);
        let config = BenchConfig {
            threads: parse_usize(args.next(), DEFAULT_THREADS)?,
            ops_per_thread: parse_usize(args.next(), DEFAULT_OPS_PER_THREAD)?,
            lock_keys: parse_usize(args.next(), DEFAULT_LOCK_KEYS)?,
            members: parse_usize(args.next(), DEFAULT_MEMBERS)?,
        };
        if config.threads == 0 || config.lock_keys == 0 || config.members == 0 {
            bail!("threads, lock_keys and members must be non-zero");
        }
        Ok(config)
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> anyhow::Result<usize> {
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid numeric argument `{raw}`")),
        None => Ok(fallback),
    }
}

/// XorShift keeps the workload reproducible across runs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    info!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BenchConfig::from_args()?;
    let store = Arc::new(MemoryStore::new());
    info!(
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        lock_keys = config.lock_keys,
        members = config.members,
        "starting store benchmark"
    );

    bench_locks(&store, &config)?;
    bench_ranking(&store, &config)?;
    Ok(())
}

fn bench_locks(store: &Arc<MemoryStore>, config: &BenchConfig) -> anyhow::Result<()> {
    let keys: Arc<Vec<String>> = Arc::new(
        (0..config.lock_keys)
            .map(|idx| format!("bench:lock:{idx}"))
            .collect(),
    );
    let release = Script::compare_and_delete();

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|thread_idx| {
            let store = Arc::clone(store);
            let keys = Arc::clone(&keys);
            let release = release.clone();
            let ops = config.ops_per_thread;
            thread::spawn(move || -> anyhow::Result<usize> {
                let owner = format!("\"worker-{thread_idx}\"");
                let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ thread_idx as u64);
                let mut acquired = 0;
                for _ in 0..ops {
                    let key = keys[rng.next_below(keys.len())].as_bytes();
                    if store.set_if_absent(key, owner.as_bytes(), Some(LOCK_TTL))? {
                        acquired += 1;
                        let reply = store.eval(&release, &[key], &[owner.as_bytes()])?;
                        if reply != ScriptReply::Integer(1) {
                            bail!("lock {key:?} released by another owner");
                        }
                    }
                }
                Ok(acquired)
            })
        })
        .collect();

    let mut acquired = 0;
    for handle in handles {
        acquired += handle
            .join()
            .map_err(|_| anyhow::anyhow!("lock worker panicked"))??;
    }
    let total = config.threads * config.ops_per_thread;
    report("LOCK+UNLOCK", total, start.elapsed());
    info!(acquired, attempts = total, "lock acquisition rate");
    Ok(())
}

fn bench_ranking(store: &Arc<MemoryStore>, config: &BenchConfig) -> anyhow::Result<()> {
    let members: Vec<String> = (0..config.members)
        .map(|idx| format!("player-{idx}"))
        .collect();
    let board = b"bench:board";

    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321);
    let start = Instant::now();
    for _ in 0..config.ops_per_thread {
        let member = members[rng.next_below(members.len())].as_bytes();
        let score = store.zincrby(board, member, 1.0)?;
        black_box(score);
    }
    report("ZINCRBY", config.ops_per_thread, start.elapsed());

    let start = Instant::now();
    for _ in 0..config.ops_per_thread {
        let top = store.zrange(board, 0, 9, Order::Descending)?;
        black_box(top);
    }
    report("ZREVRANGE top10", config.ops_per_thread, start.elapsed());
    Ok(())
}
