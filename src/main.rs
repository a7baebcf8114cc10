//! Stress driver for `mvart`.
//!
//! Hammers the tree and the transaction layer from many threads, verifies
//! the end state, and reports the debug counters. A watchdog reports any
//! worker that stops making progress.
//!
//! Run with:
//! ```bash
//! cargo run --release
//! RUST_LOG=mvart=debug cargo run --features tracing
//! cargo run --release --features mimalloc -- 16 200000
//! ```

#![allow(clippy::unwrap_used)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mvart::{Art, Store, StoreConfig, TxnError, stats};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// =============================================================================
// Key Generation
// =============================================================================

/// Spread sequential indices over the key space so inserts hit many nodes.
fn key_for(i: u64) -> [u8; 8] {
    i.wrapping_mul(0x9e37_79b9_7f4a_7c15).to_be_bytes()
}

// =============================================================================
// Thread progress tracking for hang detection
// =============================================================================

struct ThreadProgress {
    current_op: Vec<AtomicUsize>,
    last_progress_ms: Vec<AtomicU64>,
    done: Vec<AtomicBool>,
    start: Instant,
}

impl ThreadProgress {
    fn new(threads: usize) -> Self {
        Self {
            current_op: (0..threads).map(|_| AtomicUsize::new(0)).collect(),
            last_progress_ms: (0..threads).map(|_| AtomicU64::new(0)).collect(),
            done: (0..threads).map(|_| AtomicBool::new(false)).collect(),
            start: Instant::now(),
        }
    }

    fn update(&self, thread_id: usize, op: usize) {
        self.current_op[thread_id].store(op, Ordering::Relaxed);
        self.last_progress_ms[thread_id]
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn mark_done(&self, thread_id: usize) {
        self.done[thread_id].store(true, Ordering::Relaxed);
    }

    fn report_stuck(&self, timeout_ms: u64) -> Vec<(usize, usize, u64)> {
        let now_ms = self.start.elapsed().as_millis() as u64;
        (0..self.done.len())
            .filter(|&i| !self.done[i].load(Ordering::Relaxed))
            .filter_map(|i| {
                let last = self.last_progress_ms[i].load(Ordering::Relaxed);
                let stall = now_ms.saturating_sub(last);
                (stall > timeout_ms).then(|| (i, self.current_op[i].load(Ordering::Relaxed), stall))
            })
            .collect()
    }

    fn all_done(&self) -> bool {
        self.done.iter().all(|d| d.load(Ordering::Relaxed))
    }
}

/// Run `work(thread_id, progress)` on `threads` workers under a watchdog.
fn supervised<F>(name: &str, threads: usize, work: F) -> Duration
where
    F: Fn(usize, &ThreadProgress) + Send + Sync + 'static,
{
    let progress = Arc::new(ThreadProgress::new(threads));
    let work = Arc::new(work);

    let watchdog = {
        let progress = Arc::clone(&progress);
        let name = name.to_string();
        thread::spawn(move || {
            while !progress.all_done() {
                thread::sleep(Duration::from_millis(500));
                for (tid, op, stall_ms) in progress.report_stuck(2000) {
                    eprintln!("!!! STUCK [{name}]: thread {tid} at op {op} for {stall_ms}ms");
                }
            }
        })
    };

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let progress = Arc::clone(&progress);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                work(t, &progress);
                progress.mark_done(t);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let elapsed = start.elapsed();
    let _ = watchdog.join();
    elapsed
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("{title}");
    println!("{}", "=".repeat(80));
}

// =============================================================================
// Tree phases
// =============================================================================

fn run_disjoint_inserts(threads: usize, ops: usize) {
    banner(&format!("DISJOINT INSERTS ({threads} threads, {ops} ops/thread)"));
    let tree = Arc::new(Art::<u64>::new());

    let elapsed = {
        let tree = Arc::clone(&tree);
        supervised("insert", threads, move |t, progress| {
            let guard = tree.guard();
            for i in 0..ops {
                progress.update(t, i);
                let n = (t * ops + i) as u64;
                tree.insert_with_guard(&key_for(n), Arc::new(n), &guard);
            }
        })
    };

    let total = threads * ops;
    let missing = (0..total as u64)
        .filter(|&n| tree.search(&key_for(n)).as_deref() != Some(&n))
        .count();
    println!(
        "{total} inserts in {elapsed:?} ({:.0} ops/sec), len={}, missing={missing}",
        total as f64 / elapsed.as_secs_f64(),
        tree.len()
    );
    println!("{:?}", tree.node_stats());
    assert_eq!(missing, 0);
    assert_eq!(tree.len(), total);
}

fn run_mixed(threads: usize, ops: usize, key_space: u64) {
    banner(&format!(
        "MIXED INSERT/REMOVE/SCAN ({threads} threads, {ops} ops/thread, {key_space} keys)"
    ));
    let tree = Arc::new(Art::<u64>::new());

    let elapsed = {
        let tree = Arc::clone(&tree);
        supervised("mixed", threads, move |t, progress| {
            let mut state = (t as u64 + 1).wrapping_mul(0x2545_f491_4f6c_dd1d);
            for i in 0..ops {
                progress.update(t, i);
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let n = state % key_space;
                let key = key_for(n);
                match state % 10 {
                    0..=4 => {
                        tree.insert(&key, n);
                    }
                    5..=7 => {
                        tree.remove(&key);
                    }
                    8 => {
                        if let Some(v) = tree.search(&key) {
                            assert_eq!(*v, n);
                        }
                    }
                    _ => {
                        let mut last: Option<Vec<u8>> = None;
                        for (k, _) in tree.iter(Some(&key), None).take(32) {
                            assert!(last.as_ref().is_none_or(|l| *l < k), "scan out of order");
                            last = Some(k);
                        }
                    }
                }
            }
        })
    };

    let scanned = tree.iter(None, None).count();
    println!(
        "{} ops in {elapsed:?}, len={}, scanned={scanned}",
        threads * ops,
        tree.len()
    );
    println!("{:?}", tree.node_stats());
    assert_eq!(scanned, tree.len());
}

// =============================================================================
// Transaction phase
// =============================================================================

fn run_counter_txns(threads: usize, ops: usize) {
    banner(&format!("MVCC COUNTER ({threads} threads, {ops} increments/thread)"));
    let store = Arc::new(Store::<u64>::with_config(
        StoreConfig::default().with_inline_gc(true),
    ));
    let clock = Arc::new(AtomicU64::new(1));
    let aborts = Arc::new(AtomicUsize::new(0));

    {
        let mut seed = store.begin_at(0, true);
        seed.set(b"counter", 0).unwrap();
        seed.commit_at(1).unwrap();
    }

    let elapsed = {
        let store = Arc::clone(&store);
        let clock = Arc::clone(&clock);
        let aborts = Arc::clone(&aborts);
        supervised("counter", threads, move |t, progress| {
            let mut done = 0;
            while done < ops {
                progress.update(t, done);
                // A fresh read timestamp per attempt: updaters reading at
                // the same timestamp pin the counter for each other.
                let read_ts = clock.fetch_add(1, Ordering::SeqCst) + 1;
                let mut txn = store.begin_at(read_ts, true);
                // Registered first, so a watermark still at or below
                // `read_ts` keeps this snapshot's history alive.
                if read_ts < store.watermark() {
                    txn.discard();
                    continue;
                }
                let result = txn
                    .get(b"counter")
                    .and_then(|current| txn.set(b"counter", *current + 1));
                match result {
                    Ok(()) => {
                        let commit_ts = clock.fetch_add(1, Ordering::SeqCst) + 1;
                        txn.commit_at(commit_ts).unwrap();
                        store.advance_watermark(commit_ts.saturating_sub(64));
                        done += 1;
                    }
                    Err(TxnError::KeyNotExists) => unreachable!("counter was seeded"),
                    Err(_) => {
                        txn.discard();
                        aborts.fetch_add(1, Ordering::Relaxed);
                        thread::yield_now();
                    }
                }
            }
        })
    };

    let final_ts = clock.load(Ordering::SeqCst);
    let value = *store.begin_at(final_ts, false).get(b"counter").unwrap();
    let gc = store.gc();
    println!(
        "counter={value} (expected {}), aborts={}, in {elapsed:?}",
        threads * ops,
        aborts.load(Ordering::Relaxed)
    );
    println!("{gc:?}");
    assert_eq!(value as usize, threads * ops);
}

fn init_logging() {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_thread_ids(true)
            .try_init();
    }
}

fn main() {
    init_logging();

    let mut args = env::args().skip(1);
    let threads: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(8);
    let ops: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(50_000);

    eprintln!("mvart stress driver: {threads} threads, {ops} ops/thread");
    eprintln!("Watchdog will report any thread stuck for >2 seconds.");

    stats::reset_debug_counters();
    run_disjoint_inserts(threads, ops);
    run_mixed(threads, ops, 4096);
    run_counter_txns(threads, ops / 50);

    println!("\n{:?}", stats::debug_counters());
    eprintln!("\nAll phases completed!");
}
