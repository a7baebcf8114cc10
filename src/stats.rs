//! Relaxed debug counters.
//!
//! Process-wide and never reset implicitly. They exist for stress drivers
//! and tests that want to confirm a structural path was actually taken, so
//! they are approximate under concurrency and not part of any invariant.

use std::sync::atomic::AtomicU64;

use crate::ordering::RELAXED;

/// Optimistic attempts abandoned because a version check failed.
pub static RESTART_COUNT: AtomicU64 = AtomicU64::new(0);

/// Inner nodes replaced by the next larger kind.
pub static GROW_COUNT: AtomicU64 = AtomicU64::new(0);

/// Inner nodes replaced by the next smaller kind.
pub static SHRINK_COUNT: AtomicU64 = AtomicU64::new(0);

/// `Node4`s merged into their only remaining entry.
pub static COLLAPSE_COUNT: AtomicU64 = AtomicU64::new(0);

/// Inner nodes split because an inserted key diverged inside the prefix.
pub static PREFIX_SPLIT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Iterator recoveries after a checkpoint failed validation.
pub static ITER_RECOVERY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Version nodes unlinked by chain trimming.
pub static GC_RECLAIMED_COUNT: AtomicU64 = AtomicU64::new(0);

/// Snapshot of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugCounters {
    /// See [`RESTART_COUNT`].
    pub restarts: u64,
    /// See [`GROW_COUNT`].
    pub grows: u64,
    /// See [`SHRINK_COUNT`].
    pub shrinks: u64,
    /// See [`COLLAPSE_COUNT`].
    pub collapses: u64,
    /// See [`PREFIX_SPLIT_COUNT`].
    pub prefix_splits: u64,
    /// See [`ITER_RECOVERY_COUNT`].
    pub iter_recoveries: u64,
    /// See [`GC_RECLAIMED_COUNT`].
    pub gc_reclaimed: u64,
}

/// Read every counter.
#[must_use]
pub fn debug_counters() -> DebugCounters {
    DebugCounters {
        restarts: RESTART_COUNT.load(RELAXED),
        grows: GROW_COUNT.load(RELAXED),
        shrinks: SHRINK_COUNT.load(RELAXED),
        collapses: COLLAPSE_COUNT.load(RELAXED),
        prefix_splits: PREFIX_SPLIT_COUNT.load(RELAXED),
        iter_recoveries: ITER_RECOVERY_COUNT.load(RELAXED),
        gc_reclaimed: GC_RECLAIMED_COUNT.load(RELAXED),
    }
}

/// Zero every counter.
pub fn reset_debug_counters() {
    for counter in [
        &RESTART_COUNT,
        &GROW_COUNT,
        &SHRINK_COUNT,
        &COLLAPSE_COUNT,
        &PREFIX_SPLIT_COUNT,
        &ITER_RECOVERY_COUNT,
        &GC_RECLAIMED_COUNT,
    ] {
        counter.store(0, RELAXED);
    }
}

#[inline]
pub(crate) fn record(counter: &AtomicU64) {
    counter.fetch_add(1, RELAXED);
}

#[inline]
pub(crate) fn record_n(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, RELAXED);
}
