//! Version-chain trimming.
//!
//! A version is garbage once a newer committed version has
//! `begin_ts <= safepoint`: every open reader, and every reader opened at
//! or above the watermark, stops at that newer version. Trimming cuts the
//! chain below it and retires the tail through the tree's collector.

use seize::LocalGuard;

use crate::stats::{self, GC_RECLAIMED_COUNT};
use crate::tracing_helpers::debug_log;

use super::Store;
use super::chain::VersionChain;

/// Outcome of one [`Store::gc`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Chains visited.
    pub chains_inspected: usize,
    /// Chains that lost at least one version.
    pub chains_pruned: usize,
    /// Versions unlinked and retired.
    pub versions_reclaimed: usize,
    /// Safepoint the sweep trimmed against.
    pub safepoint: u64,
}

impl<V: Send + Sync + 'static> Store<V> {
    /// Trim every chain against the current safepoint.
    ///
    /// Runs concurrently with transactions. Chains another thread is
    /// already trimming are skipped.
    pub fn gc(&self) -> GcStats {
        let mut gc = GcStats {
            safepoint: self.safepoint(),
            ..GcStats::default()
        };
        let guard = self.tree().guard();

        for (_, chain) in self.tree().iter(None, None) {
            gc.chains_inspected += 1;
            let reclaimed = self.trim_chain(&chain, gc.safepoint, &guard);
            if reclaimed > 0 {
                gc.chains_pruned += 1;
                gc.versions_reclaimed += reclaimed;
            }
        }

        debug_log!(
            safepoint = gc.safepoint,
            inspected = gc.chains_inspected,
            reclaimed = gc.versions_reclaimed,
            "gc: sweep"
        );
        gc
    }

    /// Trim one chain if it is long enough to bother.
    pub(crate) fn trim_chain(
        &self,
        chain: &VersionChain<V>,
        safepoint: u64,
        guard: &LocalGuard<'_>,
    ) -> usize {
        if chain.len(guard) < self.config().gc_min_chain_len {
            return 0;
        }
        let reclaimed = chain.trim(safepoint, guard);
        stats::record_n(&GC_RECLAIMED_COUNT, reclaimed as u64);
        reclaimed
    }
}
