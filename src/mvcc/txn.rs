//! Transaction handles.

use std::collections::HashMap;
use std::fmt as StdFmt;
use std::mem;
use std::sync::Arc;

use seize::LocalGuard;

use crate::error::TxnError;
use crate::iter::Iter;
use crate::reclaim::retire;
use crate::tracing_helpers::{debug_log, trace_log};

use super::Store;
use super::chain::{Installed, VersionChain};

/// A write staged by an open transaction.
struct PendingWrite<V> {
    chain: Arc<VersionChain<V>>,
    installed: Installed<V>,
}

/// An open transaction reading as of a fixed timestamp.
///
/// Finish it with [`commit_at`](Self::commit_at) or
/// [`discard`](Self::discard). Dropping an unfinished transaction discards
/// it.
pub struct Txn<'s, V: Send + Sync + 'static> {
    store: &'s Store<V>,
    id: u64,
    read_ts: u64,
    update: bool,
    writes: HashMap<Vec<u8>, PendingWrite<V>>,
    finished: bool,
}

impl<V: Send + Sync + 'static> StdFmt::Debug for Txn<'_, V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("read_ts", &self.read_ts)
            .field("update", &self.update)
            .field("pending", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl<V: Send + Sync + 'static> Drop for Txn<'_, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

impl<'s, V: Send + Sync + 'static> Txn<'s, V> {
    pub(super) fn new(store: &'s Store<V>, id: u64, read_ts: u64, update: bool) -> Self {
        trace_log!(id, read_ts, update, "txn: begin");
        Self {
            store,
            id,
            read_ts,
            update,
            writes: HashMap::new(),
            finished: false,
        }
    }

    /// Transaction id, unique per [`IdAllocator`](super::IdAllocator).
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Timestamp this transaction reads as of.
    #[must_use]
    pub const fn read_ts(&self) -> u64 {
        self.read_ts
    }

    /// Whether this transaction may write.
    #[must_use]
    pub const fn is_update(&self) -> bool {
        self.update
    }

    /// Number of keys written and not yet committed.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Read `key` as of this transaction's read timestamp.
    ///
    /// Own pending writes are returned first.
    ///
    /// # Errors
    ///
    /// - [`TxnError::KeyNotExists`] if no version is visible.
    /// - [`TxnError::AnotherTxnHeldWLock`] if the visible version is
    ///   write-locked by another open transaction.
    pub fn get(&self, key: &[u8]) -> Result<Arc<V>, TxnError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.installed.value());
        }
        let tree = self.store.tree();
        let guard = tree.guard();
        let chain = tree
            .search_with_guard(key, &guard)
            .ok_or(TxnError::KeyNotExists)?;
        chain.visible(self.read_ts, self.id, &guard)
    }

    /// Stage `value` for `key`.
    ///
    /// # Errors
    ///
    /// - [`TxnError::ReadOnly`] if the transaction was opened without
    ///   `update`.
    /// - [`TxnError::FailedToAcquireWLock`] if another open transaction
    ///   holds the key.
    /// - [`TxnError::WriteConflicts`] if the current version was read or
    ///   committed above this transaction's read timestamp. The
    ///   transaction should be restarted at a later timestamp.
    pub fn set(&mut self, key: &[u8], value: V) -> Result<(), TxnError> {
        if !self.update {
            return Err(TxnError::ReadOnly);
        }
        let tree = self.store.tree();
        let guard = tree.guard();

        if let Some(pending) = self.writes.get_mut(key) {
            // SAFETY: `installed` is ours and still pending.
            let old = unsafe { pending.chain.supersede(&mut pending.installed, Arc::new(value)) };
            // SAFETY: displaced from the head above.
            unsafe { retire(&guard, old) };
            return Ok(());
        }

        let chain = tree.get_or_insert_with_guard(key, VersionChain::new, &guard);
        let installed = chain.install(self.id, self.read_ts, Arc::new(value), &guard)?;
        self.writes.insert(key.to_vec(), PendingWrite { chain, installed });
        Ok(())
    }

    /// Publish every pending write with `begin_ts = commit_ts`.
    ///
    /// # Errors
    ///
    /// [`TxnError::CommitBeforeRead`] if `commit_ts` is below the read
    /// timestamp; the transaction is discarded instead.
    pub fn commit_at(self, commit_ts: u64) -> Result<(), TxnError> {
        self.commit_at_with(commit_ts, |_| {})
    }

    /// [`commit_at`](Self::commit_at), then hand the outcome to `callback`
    /// once the writes are visible (or discarded).
    ///
    /// # Errors
    ///
    /// Same as [`commit_at`](Self::commit_at).
    pub fn commit_at_with(
        mut self,
        commit_ts: u64,
        callback: impl FnOnce(Result<(), TxnError>),
    ) -> Result<(), TxnError> {
        let result = self.commit(commit_ts);
        callback(result);
        result
    }

    /// Drop every pending write, restoring the versions they superseded.
    pub fn discard(mut self) {
        self.abort();
    }

    /// Scan `(start, end]` as of this transaction's read timestamp.
    ///
    /// Yields the visible value of each key (own pending writes first),
    /// skipping keys with no visible version. A key whose visible version
    /// is locked by another transaction yields
    /// [`TxnError::AnotherTxnHeldWLock`] and the scan continues.
    #[must_use]
    pub fn iter<'t>(&'t self, start: Option<&[u8]>, end: Option<&[u8]>) -> TxnIter<'t, 's, V> {
        let tree = self.store.tree();
        TxnIter {
            txn: self,
            guard: tree.guard(),
            inner: tree.iter(start, end),
        }
    }

    fn commit(&mut self, commit_ts: u64) -> Result<(), TxnError> {
        if commit_ts < self.read_ts {
            self.abort();
            return Err(TxnError::CommitBeforeRead);
        }

        let writes = mem::take(&mut self.writes);
        for pending in writes.values() {
            // SAFETY: `installed` is ours and still pending.
            unsafe { pending.chain.commit(&pending.installed, commit_ts) };
        }
        self.finish();
        debug_log!(id = self.id, commit_ts, writes = writes.len(), "txn: commit");

        if self.store.config().inline_gc && !writes.is_empty() {
            let guard = self.store.tree().guard();
            let safepoint = self.store.safepoint();
            for pending in writes.values() {
                self.store.trim_chain(&pending.chain, safepoint, &guard);
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        if !self.writes.is_empty() {
            let guard = self.store.tree().guard();
            for (_, pending) in self.writes.drain() {
                // SAFETY: `installed` is ours and still pending.
                unsafe { pending.chain.abort(&pending.installed) };
                // SAFETY: unlinked from the head above.
                unsafe { retire(&guard, pending.installed.node) };
            }
        }
        self.finish();
        trace_log!(id = self.id, "txn: discard");
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.store.release(self.read_ts);
        }
    }
}

/// Snapshot scan returned by [`Txn::iter`].
pub struct TxnIter<'t, 's, V: Send + Sync + 'static> {
    txn: &'t Txn<'s, V>,
    guard: LocalGuard<'s>,
    inner: Iter<'s, VersionChain<V>>,
}

impl<V: Send + Sync + 'static> StdFmt::Debug for TxnIter<'_, '_, V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("TxnIter")
            .field("txn", &self.txn.id)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<V: Send + Sync + 'static> TxnIter<'_, '_, V> {
    /// Scan `[start, end)` in descending order instead.
    #[must_use]
    pub fn reverse(self) -> Self {
        Self {
            inner: self.inner.reverse(),
            ..self
        }
    }
}

impl<V: Send + Sync + 'static> Iterator for TxnIter<'_, '_, V> {
    type Item = Result<(Vec<u8>, Arc<V>), TxnError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, chain) = self.inner.next()?;
            if let Some(pending) = self.txn.writes.get(&key) {
                return Some(Ok((key, pending.installed.value())));
            }
            match chain.visible(self.txn.read_ts, self.txn.id, &self.guard) {
                Ok(value) => return Some(Ok((key, value))),
                Err(TxnError::KeyNotExists) => {}
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
