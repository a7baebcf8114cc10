//! Benchmarks for `Art` and `Store` using Divan.
//!
//! Run with: `cargo bench --bench tree`
#![expect(clippy::cast_possible_truncation)]

use std::sync::atomic::{AtomicU64, Ordering};

use divan::{Bencher, black_box};
use mvart::{Art, Store};

fn main() {
    divan::main();
}

/// Spread indices over the key space.
fn scattered(i: u64) -> [u8; 8] {
    i.wrapping_mul(0x9e37_79b9_7f4a_7c15).to_be_bytes()
}

fn filled(n: usize) -> Art<u64> {
    let tree = Art::new();
    for i in 0..n as u64 {
        tree.insert(&scattered(i), i);
    }
    tree
}

// =============================================================================
// Insert Operations
// =============================================================================

#[divan::bench_group]
mod insert {
    use super::{Art, Bencher, black_box, scattered};

    #[divan::bench]
    fn insert_single(bencher: Bencher) {
        bencher.with_inputs(Art::<u64>::new).bench_local_values(|tree| {
            let _ = tree.insert(black_box(b"hello"), black_box(42u64));
            tree
        });
    }

    #[divan::bench]
    fn insert_update_existing(bencher: Bencher) {
        bencher
            .with_inputs(|| {
                let tree = Art::<u64>::new();
                tree.insert(b"key", 1);
                tree
            })
            .bench_local_values(|tree| {
                let old = tree.insert(black_box(b"key"), black_box(2u64));
                let _ = black_box(old);
                tree
            });
    }

    // Long shared heads force prefix splits past the inline limit.
    #[divan::bench(args = [4, 16, 64])]
    fn insert_key_len(bencher: Bencher, len: usize) {
        bencher.with_inputs(Art::<u64>::new).bench_local_values(|tree| {
            for b in 0..16u8 {
                let mut key = vec![b'k'; len];
                key.push(b);
                let _ = tree.insert(black_box(&key), u64::from(b));
            }
            tree
        });
    }

    #[divan::bench(args = [100, 1000, 10000])]
    fn scattered_insert(bencher: Bencher, n: u64) {
        bencher.with_inputs(Art::<u64>::new).bench_local_values(|tree| {
            for i in 0..n {
                let _ = tree.insert(&scattered(i), i);
            }
            tree
        });
    }

    #[divan::bench(args = [100, 1000, 10000])]
    fn sequential_insert(bencher: Bencher, n: u64) {
        bencher.with_inputs(Art::<u64>::new).bench_local_values(|tree| {
            for i in 0..n {
                let _ = tree.insert(&i.to_be_bytes(), i);
            }
            tree
        });
    }
}

// =============================================================================
// Search Operations
// =============================================================================

#[divan::bench_group]
mod search {
    use super::{Bencher, black_box, filled, scattered};

    #[divan::bench(args = [100, 10000])]
    fn search_hit(bencher: Bencher, n: usize) {
        let tree = filled(n);
        bencher.bench(|| tree.search(black_box(&scattered(n as u64 / 2))));
    }

    #[divan::bench(args = [100, 10000])]
    fn search_miss(bencher: Bencher, n: usize) {
        let tree = filled(n);
        bencher.bench(|| tree.search(black_box(&scattered(n as u64 + 1))));
    }

    #[divan::bench(args = [100, 10000])]
    fn search_with_guard(bencher: Bencher, n: usize) {
        let tree = filled(n);
        let guard = tree.guard();
        bencher.bench_local(|| tree.search_with_guard(black_box(&scattered(7)), &guard));
    }
}

// =============================================================================
// Remove Operations
// =============================================================================

#[divan::bench_group]
mod remove {
    use super::{Bencher, filled, scattered};

    // Drains through shrink and collapse down to the root.
    #[divan::bench(args = [100, 1000])]
    fn drain(bencher: Bencher, n: usize) {
        bencher.with_inputs(|| filled(n)).bench_local_values(|tree| {
            for i in 0..n as u64 {
                let _ = tree.remove(&scattered(i));
            }
            tree
        });
    }
}

// =============================================================================
// Range Scans
// =============================================================================

#[divan::bench_group]
mod scan {
    use super::{Bencher, black_box, filled};

    #[divan::bench(args = [1000, 10000])]
    fn full_forward(bencher: Bencher, n: usize) {
        let tree = filled(n);
        bencher.bench(|| tree.iter(None, None).count());
    }

    #[divan::bench(args = [1000, 10000])]
    fn full_reverse(bencher: Bencher, n: usize) {
        let tree = filled(n);
        bencher.bench(|| tree.iter(None, None).reverse().count());
    }

    #[divan::bench(args = [10, 100])]
    fn bounded_take(bencher: Bencher, take: usize) {
        let tree = filled(10000);
        bencher.bench(|| {
            tree.iter(Some(black_box(&[0x40u8][..])), None)
                .take(take)
                .count()
        });
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[divan::bench_group]
mod txn {
    use super::{AtomicU64, Bencher, Ordering, Store, black_box, scattered};

    fn seeded(n: u64) -> Store<u64> {
        let store = Store::new();
        let mut txn = store.begin_at(1, true);
        for i in 0..n {
            txn.set(&scattered(i), i).ok();
        }
        txn.commit_at(1).ok();
        store
    }

    #[divan::bench]
    fn read_only_get(bencher: Bencher) {
        let store = seeded(1000);
        bencher.bench(|| {
            let txn = store.begin_at(2, false);
            txn.get(black_box(&scattered(500))).ok()
        });
    }

    // Every iteration stacks one version on a single hot key.
    #[divan::bench(sample_count = 1000)]
    fn update_hot_key(bencher: Bencher) {
        let store = seeded(1);
        let clock = AtomicU64::new(1);
        bencher.bench(|| {
            let ts = clock.fetch_add(1, Ordering::Relaxed) + 1;
            let mut txn = store.begin_at(ts, true);
            txn.set(&scattered(0), ts).ok();
            txn.commit_at(ts).ok()
        });
    }

    #[divan::bench(args = [1000])]
    fn snapshot_scan(bencher: Bencher, n: u64) {
        let store = seeded(n);
        bencher.bench(|| {
            let txn = store.begin_at(2, false);
            txn.iter(None, None).filter(Result::is_ok).count()
        });
    }
}
