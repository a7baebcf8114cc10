//! Per-key version chains.
//!
//! A chain is a newest-first singly linked list of [`VersionNode`]s hanging
//! off a [`VersionChain`] head stored in the tree. Each version carries its
//! validity interval `[begin_ts, end_ts)`, a [`ReadStamp`] naming the
//! highest read timestamp that observed it and who observed it there, and a
//! `txn` word that doubles as a single-writer lock: `0` is unlocked,
//! anything else is the id of the holder.
//!
//! ```text
//! head ──► [uncommitted, txn=7] ──► [begin=5, txn=7] ──► [begin=2, end=5] ──► null
//!           pending write of 7       prior, locked by 7    trimmable once the
//!                                                          safepoint reaches 5
//! ```
//!
//! Only the holder of the prior version's lock moves `head`, and only a
//! single trimmer at a time cuts the tail, so the two never race on the
//! same link.
//!
//! A reader stamps the version under its stamp mutex, then checks `txn`.
//! A writer takes `txn`, then inspects the stamp under the same mutex.
//! Whichever critical section runs second sees the other side: either the
//! reader finds the lock held, or the writer finds the reader's stamp and
//! refuses the write.
//!
//! A reader refused with [`TxnError::AnotherTxnHeldWLock`] has already
//! stamped the version. If the holder then aborts, writers at or below that
//! reader's timestamp may get [`TxnError::WriteConflicts`] although nobody
//! returned the value.

use std::marker::PhantomData;
use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

use parking_lot::Mutex;
use seize::LocalGuard;

use crate::error::TxnError;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, WRITE_ORD};
use crate::reclaim::retire;

/// `txn` value of a version nobody holds.
pub(crate) const UNLOCKED: u64 = 0;

/// `end_ts` of a version that is still current.
pub(crate) const TS_INFINITY: u64 = u64::MAX;

/// `ReadStamp::reader` of a version nobody has read at `ts`.
const NO_READER: u64 = 0;

/// `ReadStamp::reader` of a version read at `ts` by more than one
/// transaction.
const SHARED_READERS: u64 = u64::MAX;

/// Highest read timestamp that observed a version, and which transaction
/// observed it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadStamp {
    pub(crate) ts: u64,
    pub(crate) reader: u64,
}

impl ReadStamp {
    pub(crate) const fn new() -> Self {
        Self {
            ts: 0,
            reader: NO_READER,
        }
    }

    /// Record a read by `reader` at `ts`.
    pub(crate) fn observe(&mut self, ts: u64, reader: u64) {
        if ts > self.ts {
            *self = Self { ts, reader };
        } else if ts == self.ts && self.reader != reader {
            self.reader = if self.reader == NO_READER {
                reader
            } else {
                SHARED_READERS
            };
        }
    }

    /// Whether `writer`, reading at `ts`, may supersede the version.
    ///
    /// A read at `ts` by anyone but the writer itself pins the version for
    /// that snapshot.
    pub(crate) const fn admits(&self, ts: u64, writer: u64) -> bool {
        self.ts < ts || (self.ts == ts && (self.reader == NO_READER || self.reader == writer))
    }
}

/// One version of a key's value.
pub(crate) struct VersionNode<V> {
    txn: AtomicU64,
    read_stamp: Mutex<ReadStamp>,
    begin_ts: AtomicU64,
    end_ts: AtomicU64,
    uncommitted: AtomicBool,
    next: AtomicPtr<VersionNode<V>>,
    value: Arc<V>,
}

impl<V> VersionNode<V> {
    /// Allocate an uncommitted version locked by `txn`.
    fn pending(txn: u64, value: Arc<V>, next: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Self {
            txn: AtomicU64::new(txn),
            read_stamp: Mutex::new(ReadStamp::new()),
            begin_ts: AtomicU64::new(0),
            end_ts: AtomicU64::new(TS_INFINITY),
            uncommitted: AtomicBool::new(true),
            next: AtomicPtr::new(next),
            value,
        }))
    }

    pub(crate) const fn value(&self) -> &Arc<V> {
        &self.value
    }

    pub(crate) fn is_committed(&self) -> bool {
        !self.uncommitted.load(READ_ORD)
    }

    pub(crate) fn begin_ts(&self) -> u64 {
        self.begin_ts.load(READ_ORD)
    }

    pub(crate) fn end_ts(&self) -> u64 {
        self.end_ts.load(READ_ORD)
    }

    pub(crate) fn read_stamp(&self) -> ReadStamp {
        *self.read_stamp.lock()
    }

    pub(crate) fn holder(&self) -> u64 {
        self.txn.load(Ordering::SeqCst)
    }

    fn unlock(&self) {
        self.txn.store(UNLOCKED, Ordering::SeqCst);
    }
}

/// A version published by an open transaction, and the version it
/// supersedes (null for the first version of a key).
pub(crate) struct Installed<V> {
    pub(crate) node: *mut VersionNode<V>,
    pub(crate) prior: *mut VersionNode<V>,
}

// SAFETY: the pointers are only dereferenced by the owning transaction,
// and the versions they name are never trimmed while it is open.
unsafe impl<V: Send + Sync> Send for Installed<V> {}
// SAFETY: shared access only reads the immutable value.
unsafe impl<V: Send + Sync> Sync for Installed<V> {}

impl<V> Installed<V> {
    /// The pending value.
    pub(crate) fn value(&self) -> Arc<V> {
        // SAFETY: a pending node is retired only by its owner.
        Arc::clone(unsafe { &*self.node }.value())
    }
}

/// Head of one key's version list, stored as the tree value.
pub(crate) struct VersionChain<V> {
    head: AtomicPtr<VersionNode<V>>,
    trimming: AtomicBool,
    _marker: PhantomData<Box<VersionNode<V>>>,
}

impl<V> Default for VersionChain<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for VersionChain<V> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            // SAFETY: exclusive access; every linked node is owned by the chain.
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(RELAXED);
        }
    }
}

impl<V> VersionChain<V> {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(StdPtr::null_mut()),
            trimming: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Newest version, or null.
    pub(crate) fn head(&self) -> *mut VersionNode<V> {
        self.head.load(READ_ORD)
    }

    /// Number of linked versions, committed or not.
    pub(crate) fn len(&self, _guard: &LocalGuard<'_>) -> usize {
        let mut len = 0;
        let mut cur = self.head();
        while !cur.is_null() {
            len += 1;
            // SAFETY: reachable under `_guard`.
            cur = unsafe { &*cur }.next.load(READ_ORD);
        }
        len
    }

    /// The value visible at `read_ts` to transaction `reader`.
    ///
    /// Walks newest to oldest, skipping uncommitted versions and versions
    /// committed after `read_ts`. Stamps the found version before checking
    /// its lock, then checks `end_ts` to catch a commit that landed
    /// mid-walk.
    pub(crate) fn visible(
        &self,
        read_ts: u64,
        reader: u64,
        _guard: &LocalGuard<'_>,
    ) -> Result<Arc<V>, TxnError> {
        let mut cur = self.head();
        while !cur.is_null() {
            // SAFETY: reachable under `_guard`.
            let version = unsafe { &*cur };
            if version.is_committed() && version.begin_ts() <= read_ts {
                version.read_stamp.lock().observe(read_ts, reader);
                let holder = version.holder();
                if holder != UNLOCKED && holder != reader {
                    return Err(TxnError::AnotherTxnHeldWLock);
                }
                // Superseded at or below `read_ts` after the walk passed
                // the head: the successor is the visible one.
                if version.end_ts() <= read_ts {
                    cur = self.head();
                    continue;
                }
                return Ok(Arc::clone(&version.value));
            }
            cur = version.next.load(READ_ORD);
        }
        Err(TxnError::KeyNotExists)
    }

    /// Publish a pending version for `txn` in front of the current head.
    ///
    /// With a prior version the write lock is taken first, then the write
    /// is admitted only if the prior was committed at or below `read_ts`
    /// and no other transaction read it at or above `read_ts`.
    pub(crate) fn install(
        &self,
        txn: u64,
        read_ts: u64,
        value: Arc<V>,
        _guard: &LocalGuard<'_>,
    ) -> Result<Installed<V>, TxnError> {
        let prior = self.head();

        if prior.is_null() {
            let node = VersionNode::pending(txn, value, StdPtr::null_mut());
            if self
                .head
                .compare_exchange(StdPtr::null_mut(), node, CAS_SUCCESS, CAS_FAILURE)
                .is_err()
            {
                // SAFETY: never published.
                drop(unsafe { Box::from_raw(node) });
                return Err(TxnError::FailedToAcquireWLock);
            }
            return Ok(Installed {
                node,
                prior: StdPtr::null_mut(),
            });
        }

        // SAFETY: reachable under `_guard`.
        let version = unsafe { &*prior };
        if version
            .txn
            .compare_exchange(UNLOCKED, txn, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TxnError::FailedToAcquireWLock);
        }

        // A newer version was committed after `prior` was loaded.
        if self.head.load(Ordering::SeqCst) != prior {
            version.unlock();
            return Err(TxnError::FailedToAcquireWLock);
        }

        if !version.read_stamp().admits(read_ts, txn) || version.begin_ts() > read_ts {
            version.unlock();
            return Err(TxnError::WriteConflicts);
        }

        let node = VersionNode::pending(txn, value, prior);
        if self
            .head
            .compare_exchange(prior, node, CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            version.unlock();
            // SAFETY: never published.
            drop(unsafe { Box::from_raw(node) });
            return Err(TxnError::FailedToAcquireWLock);
        }
        Ok(Installed { node, prior })
    }

    /// Replace an owned pending version with a fresh one holding `value`.
    ///
    /// Returns the displaced node, which the caller must retire.
    ///
    /// # Safety
    ///
    /// `installed` must come from [`install`](Self::install) on this chain
    /// and not yet be committed or aborted.
    pub(crate) unsafe fn supersede(
        &self,
        installed: &mut Installed<V>,
        value: Arc<V>,
    ) -> *mut VersionNode<V> {
        let old = installed.node;
        // SAFETY: owned pending node.
        let txn = unsafe { &*old }.holder();
        let node = VersionNode::pending(txn, value, installed.prior);
        if self
            .head
            .compare_exchange(old, node, CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            unreachable!("pending version displaced by another writer");
        }
        installed.node = node;
        old
    }

    /// Make a pending version current as of `commit_ts`.
    ///
    /// # Safety
    ///
    /// Same contract as [`supersede`](Self::supersede).
    pub(crate) unsafe fn commit(&self, installed: &Installed<V>, commit_ts: u64) {
        // SAFETY: owned pending node.
        let node = unsafe { &*installed.node };
        node.begin_ts.store(commit_ts, WRITE_ORD);
        node.end_ts.store(TS_INFINITY, WRITE_ORD);
        // SAFETY: the prior stays linked while its lock is held.
        let prior = unsafe { installed.prior.as_ref() };
        if let Some(prior) = prior {
            prior.end_ts.store(commit_ts, WRITE_ORD);
        }
        node.uncommitted.store(false, WRITE_ORD);

        node.unlock();
        if let Some(prior) = prior {
            prior.unlock();
        }
    }

    /// Unlink a pending version, restoring its prior as the head.
    ///
    /// The caller must retire `installed.node` afterwards.
    ///
    /// # Safety
    ///
    /// Same contract as [`supersede`](Self::supersede).
    pub(crate) unsafe fn abort(&self, installed: &Installed<V>) {
        if self
            .head
            .compare_exchange(installed.node, installed.prior, CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            unreachable!("pending version displaced by another writer");
        }
        // SAFETY: the prior stays linked while its lock is held.
        if let Some(prior) = unsafe { installed.prior.as_ref() } {
            prior.unlock();
        }
    }

    /// Cut every version older than the newest committed version with
    /// `begin_ts <= safepoint`, retiring the cut nodes.
    ///
    /// Returns how many versions were retired. A chain already being
    /// trimmed by another thread is skipped.
    pub(crate) fn trim(&self, safepoint: u64, guard: &LocalGuard<'_>) -> usize {
        if self
            .trimming
            .compare_exchange(false, true, CAS_SUCCESS, CAS_FAILURE)
            .is_err()
        {
            return 0;
        }

        let mut retired = 0;
        let mut cur = self.head();
        while !cur.is_null() {
            // SAFETY: reachable under `guard`.
            let version = unsafe { &*cur };
            if version.is_committed() && version.begin_ts() <= safepoint {
                let mut tail = version.next.swap(StdPtr::null_mut(), CAS_SUCCESS);
                while !tail.is_null() {
                    // SAFETY: cut from the chain above; still valid under `guard`.
                    let next = unsafe { &*tail }.next.load(READ_ORD);
                    // SAFETY: unreachable from the head, retired once.
                    unsafe { retire(guard, tail) };
                    retired += 1;
                    tail = next;
                }
                break;
            }
            cur = version.next.load(READ_ORD);
        }

        self.trimming.store(false, WRITE_ORD);
        retired
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use seize::Collector;

    use super::*;

    fn committed(chain: &VersionChain<u64>, txn: u64, ts: u64, value: u64, guard: &LocalGuard<'_>) {
        let installed = chain.install(txn, ts, Arc::new(value), guard).unwrap();
        // SAFETY: freshly installed.
        unsafe { chain.commit(&installed, ts) };
    }

    #[test]
    fn test_visibility_by_timestamp() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();

        committed(&chain, 1, 2, 20, &guard);
        committed(&chain, 2, 5, 50, &guard);

        assert_eq!(chain.visible(1, 9, &guard), Err(TxnError::KeyNotExists));
        assert_eq!(*chain.visible(2, 9, &guard).unwrap(), 20);
        assert_eq!(*chain.visible(4, 9, &guard).unwrap(), 20);
        assert_eq!(*chain.visible(5, 9, &guard).unwrap(), 50);

        // SAFETY: head is a live committed node.
        let head = unsafe { &*chain.head() };
        assert_eq!(head.end_ts(), TS_INFINITY);
        // SAFETY: second node is live.
        let older = unsafe { &*head.next.load(READ_ORD) };
        assert_eq!(older.end_ts(), 5);
    }

    #[test]
    fn test_pending_version_is_invisible_and_locks_prior() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        let installed = chain.install(7, 3, Arc::new(30), &guard).unwrap();
        assert_eq!(chain.visible(3, 8, &guard), Err(TxnError::AnotherTxnHeldWLock));
        assert_eq!(
            chain.install(8, 3, Arc::new(31), &guard).err(),
            Some(TxnError::FailedToAcquireWLock)
        );

        // SAFETY: owned pending version.
        unsafe { chain.abort(&installed) };
        // SAFETY: unlinked above.
        unsafe { retire(&guard, installed.node) };
        assert_eq!(*chain.visible(3, 8, &guard).unwrap(), 10);
    }

    #[test]
    fn test_reader_above_blocks_writer() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        chain.visible(9, 2, &guard).unwrap();
        assert_eq!(
            chain.install(3, 5, Arc::new(50), &guard).err(),
            Some(TxnError::WriteConflicts)
        );
        // The failed writer released the lock.
        // SAFETY: head is live.
        assert_eq!(unsafe { &*chain.head() }.holder(), UNLOCKED);

        // Another reader at the writer's own timestamp also pins it.
        assert_eq!(
            chain.install(4, 9, Arc::new(90), &guard).err(),
            Some(TxnError::WriteConflicts)
        );
        assert!(chain.install(4, 10, Arc::new(100), &guard).is_ok());
    }

    #[test]
    fn test_own_read_admits_write_at_same_timestamp() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        // Read-modify-write by one transaction.
        assert_eq!(*chain.visible(5, 2, &guard).unwrap(), 10);
        assert_eq!(*chain.visible(5, 2, &guard).unwrap(), 10);
        let installed = chain.install(2, 5, Arc::new(11), &guard).unwrap();
        // SAFETY: owned pending version.
        unsafe { chain.commit(&installed, 5) };
        assert_eq!(*chain.visible(5, 3, &guard).unwrap(), 11);
    }

    #[test]
    fn test_second_reader_at_same_timestamp_pins_version() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        chain.visible(5, 2, &guard).unwrap();
        chain.visible(5, 3, &guard).unwrap();
        // SAFETY: head is live.
        let stamp = unsafe { &*chain.head() }.read_stamp();
        assert_eq!(stamp.ts, 5);
        assert!(!stamp.admits(5, 2));
        assert!(!stamp.admits(5, 3));
        assert!(stamp.admits(6, 2));

        assert_eq!(
            chain.install(2, 5, Arc::new(11), &guard).err(),
            Some(TxnError::WriteConflicts)
        );
    }

    #[test]
    fn test_refused_reader_still_stamps() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        let installed = chain.install(7, 3, Arc::new(30), &guard).unwrap();
        assert_eq!(chain.visible(6, 8, &guard), Err(TxnError::AnotherTxnHeldWLock));
        // SAFETY: owned pending version.
        unsafe { chain.abort(&installed) };
        // SAFETY: unlinked above.
        unsafe { retire(&guard, installed.node) };

        // Nobody returned the value at 6, yet writers below it conflict.
        assert_eq!(
            chain.install(9, 5, Arc::new(50), &guard).err(),
            Some(TxnError::WriteConflicts)
        );
        assert!(chain.install(9, 7, Arc::new(70), &guard).is_ok());
    }

    #[test]
    fn test_read_stamp_transitions() {
        let mut stamp = ReadStamp::new();
        assert!(stamp.admits(0, 7));

        stamp.observe(4, 7);
        assert_eq!(stamp, ReadStamp { ts: 4, reader: 7 });
        stamp.observe(4, 7);
        assert_eq!(stamp.reader, 7);
        // Lower timestamps never lower the stamp.
        stamp.observe(2, 8);
        assert_eq!(stamp, ReadStamp { ts: 4, reader: 7 });

        stamp.observe(4, 8);
        assert_eq!(stamp.reader, SHARED_READERS);
        stamp.observe(6, 9);
        assert_eq!(stamp, ReadStamp { ts: 6, reader: 9 });
    }

    #[test]
    fn test_supersede_keeps_prior() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);

        let mut installed = chain.install(2, 2, Arc::new(20), &guard).unwrap();
        // SAFETY: owned pending version.
        let old = unsafe { chain.supersede(&mut installed, Arc::new(21)) };
        // SAFETY: displaced above.
        unsafe { retire(&guard, old) };
        assert_eq!(*installed.value(), 21);
        assert_eq!(chain.len(&guard), 2);

        // SAFETY: owned pending version.
        unsafe { chain.commit(&installed, 4) };
        assert_eq!(*chain.visible(4, 3, &guard).unwrap(), 21);
        assert_eq!(*chain.visible(3, 3, &guard).unwrap(), 10);
    }

    #[test]
    fn test_trim_keeps_newest_visible_at_safepoint() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        for ts in 1..=5 {
            committed(&chain, ts, ts * 10, ts, &guard);
        }
        assert_eq!(chain.len(&guard), 5);

        // Versions at 30, 40, 50 stay: 30 is what a reader at 35 sees.
        assert_eq!(chain.trim(35, &guard), 2);
        assert_eq!(chain.len(&guard), 3);
        assert_eq!(*chain.visible(35, 9, &guard).unwrap(), 3);

        // Nothing committed at or below the safepoint: nothing to cut.
        assert_eq!(chain.trim(5, &guard), 0);
        assert_eq!(chain.trim(u64::MAX, &guard), 2);
        assert_eq!(chain.len(&guard), 1);
    }

    #[test]
    fn test_trim_skips_uncommitted_head() {
        let collector = Collector::new();
        let guard = collector.enter();
        let chain = VersionChain::new();
        committed(&chain, 1, 1, 10, &guard);
        committed(&chain, 2, 2, 20, &guard);
        let installed = chain.install(3, 3, Arc::new(30), &guard).unwrap();

        assert_eq!(chain.trim(u64::MAX, &guard), 1);
        // Pending version and its locked prior survive.
        assert_eq!(chain.len(&guard), 2);
        // SAFETY: owned pending version.
        unsafe { chain.commit(&installed, 3) };
        assert_eq!(*chain.visible(2, 9, &guard).unwrap(), 20);
    }
}
