//! Optimistic lock for inner nodes.
//!
//! [`OptLock`] packs an obsolete flag, a write-lock flag and a version
//! counter into a single `u64`. Readers never block writers: they take a
//! [`Version`] snapshot, read the node, and validate the snapshot afterwards.
//! Writers upgrade a snapshot into an exclusive [`WriteGuard`].
//!
//! # State Machine
//!
//! ```text
//! Unlocked(v) --upgrade(v)--> Locked(v) --unlock--------> Unlocked(v + 1)
//!                                       --unlock_obsolete--> Obsolete(v + 1)
//! ```
//!
//! `Obsolete` is terminal: the node has been unlinked from the tree and every
//! reader still holding a snapshot of it must restart.
//!
//! # Type-State Pattern
//! The [`WriteGuard`] proves the lock is held. Dropping it releases the lock
//! and advances the version (panic-safe).
//!
//! ```rust
//! use mvart::lock::OptLock;
//!
//! let lock = OptLock::new();
//! let before = lock.read_lock();
//! {
//!     let _guard = lock.upgrade(before).unwrap();
//! }
//! assert!(lock.read_unlock(before).is_err());
//! ```

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, RELAXED, UNLOCK_ORD, VERSION_ORD};

// ============================================================================
//  Bit Constants
// ============================================================================

/// Obsolete bit: node was unlinked and must not be trusted by anyone.
const OBSOLETE_BIT: u64 = 1 << 0;

/// Lock bit: node is exclusively held by a writer.
const LOCKED_BIT: u64 = 1 << 1;

/// Adding this to a locked word clears the lock bit and carries one into
/// the version counter.
const UNLOCK_DELTA: u64 = LOCKED_BIT;

/// Same as [`UNLOCK_DELTA`] but also sets the obsolete bit.
const UNLOCK_OBSOLETE_DELTA: u64 = LOCKED_BIT | OBSOLETE_BIT;

/// Backoff steps that spin (doubling each step) before yielding the thread.
const SPIN_LIMIT: u32 = 10;

// ============================================================================
//  Restart
// ============================================================================

/// Zero-sized marker returned when an optimistic attempt must be retried.
///
/// Tree operations propagate it with `?` out of a single attempt; the public
/// entry points loop until an attempt completes. It is never surfaced to
/// callers of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restart;

impl StdFmt::Display for Restart {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(f, "optimistic validation failed, restart required")
    }
}

// ============================================================================
//  Version
// ============================================================================

/// Snapshot of an [`OptLock`] taken by [`OptLock::read_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(u64);

impl Version {
    /// Whether the node was already obsolete when the snapshot was taken.
    #[inline]
    #[must_use]
    pub const fn is_obsolete(self) -> bool {
        self.0 & OBSOLETE_BIT != 0
    }

    /// Monotonic counter part of the snapshot (lock and obsolete bits stripped).
    #[inline]
    #[must_use]
    pub const fn counter(self) -> u64 {
        self.0 >> 2
    }
}

// ============================================================================
//  Backoff
// ============================================================================

/// Spin-then-yield backoff shared by lock waits and tree restarts.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { step: 0 }
    }

    /// Back off once: spin while cheap, yield the thread once contention persists.
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step.min(6)) {
                std::hint::spin_loop();
            }
        } else {
            std::thread::yield_now();
        }
        self.step = self.step.saturating_add(1);
    }
}

// ============================================================================
//  OptLock
// ============================================================================

/// Version-counter lock used by every inner node and by the tree root slot.
///
/// # Layout
/// Bits 2-63: version | Bit 1: locked | Bit 0: obsolete
pub struct OptLock {
    state: AtomicU64,
}

impl StdFmt::Debug for OptLock {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let raw: u64 = self.state.load(RELAXED);
        f.debug_struct("OptLock")
            .field("version", &(raw >> 2))
            .field("locked", &(raw & LOCKED_BIT != 0))
            .field("obsolete", &(raw & OBSOLETE_BIT != 0))
            .finish()
    }
}

impl Default for OptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl OptLock {
    /// Create an unlocked lock at version zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
        }
    }

    /// Check if a writer currently holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(RELAXED) & LOCKED_BIT != 0
    }

    /// Check if the node was retired.
    #[inline]
    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        self.state.load(RELAXED) & OBSOLETE_BIT != 0
    }

    /// Take an optimistic snapshot.
    ///
    /// Spins (then yields) while a writer holds the lock. The returned
    /// version may be obsolete; check [`Version::is_obsolete`].
    #[inline]
    #[must_use]
    pub fn read_lock(&self) -> Version {
        let mut backoff = Backoff::new();
        loop {
            let value: u64 = self.state.load(VERSION_ORD);
            if value & LOCKED_BIT == 0 {
                return Version(value);
            }
            backoff.snooze();
        }
    }

    /// [`read_lock`](Self::read_lock), treating an obsolete node as a restart.
    ///
    /// # Errors
    /// [`Restart`] if the node is obsolete.
    #[inline]
    pub fn read_lock_or_restart(&self) -> Result<Version, Restart> {
        let version: Version = self.read_lock();
        if version.is_obsolete() {
            return Err(Restart);
        }
        Ok(version)
    }

    /// Validate a snapshot after reading.
    ///
    /// # Errors
    /// [`Restart`] if any writer locked the node since `version` was taken.
    #[inline]
    pub fn read_unlock(&self, version: Version) -> Result<(), Restart> {
        if self.state.load(VERSION_ORD) == version.0 {
            Ok(())
        } else {
            Err(Restart)
        }
    }

    /// Upgrade a snapshot to exclusive access.
    ///
    /// # Errors
    /// [`Restart`] if the node changed since `version` was taken, is locked
    /// by someone else, or is obsolete.
    #[inline]
    pub fn upgrade(&self, version: Version) -> Result<WriteGuard<'_>, Restart> {
        if version.is_obsolete() {
            return Err(Restart);
        }

        match self.state.compare_exchange(
            version.0,
            version.0 | LOCKED_BIT,
            CAS_SUCCESS,
            CAS_FAILURE,
        ) {
            Ok(_) => Ok(WriteGuard {
                lock: self,
                obsolete: false,
                _marker: PhantomData,
            }),
            Err(_) => Err(Restart),
        }
    }

    /// Snapshot and upgrade in one step, waiting out other writers.
    ///
    /// # Errors
    /// [`Restart`] only when the node is obsolete.
    pub fn write_lock(&self) -> Result<WriteGuard<'_>, Restart> {
        let mut backoff = Backoff::new();
        loop {
            let version: Version = self.read_lock_or_restart()?;
            if let Ok(guard) = self.upgrade(version) {
                return Ok(guard);
            }
            backoff.snooze();
        }
    }
}

// ============================================================================
//  WriteGuard (Type-State Pattern)
// ============================================================================

/// Proof that an [`OptLock`] is exclusively held.
///
/// Dropping the guard performs the `unlock` transition; calling
/// [`WriteGuard::unlock_obsolete`] performs the terminal transition instead.
///
/// `PhantomData<*mut ()>` keeps the guard on the thread that acquired it.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the lock"]
pub struct WriteGuard<'a> {
    lock: &'a OptLock,
    obsolete: bool,
    _marker: PhantomData<*mut ()>,
}

impl WriteGuard<'_> {
    /// Release the lock and bump the version.
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }

    /// Release the lock, bump the version, and mark the node obsolete.
    #[inline]
    pub fn unlock_obsolete(mut self) {
        self.obsolete = true;
        drop(self);
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let delta: u64 = if self.obsolete {
            UNLOCK_OBSOLETE_DELTA
        } else {
            UNLOCK_DELTA
        };
        self.lock.state.fetch_add(delta, UNLOCK_ORD);
    }
}


/// Loom model of the lock word.
///
/// Mirrors [`OptLock`]'s bit layout and transitions on loom atomics so every
/// interleaving of snapshot, upgrade and unlock is explored.
///
/// Run with: `RUSTFLAGS="--cfg loom" cargo test --lib lock::loom_tests`
#[cfg(loom)]
mod loom_tests {
    use loom::sync::Arc;
    use loom::sync::atomic::{AtomicU64, Ordering};
    use loom::thread;

    use super::{LOCKED_BIT, OBSOLETE_BIT, UNLOCK_DELTA, UNLOCK_OBSOLETE_DELTA};

    struct LoomLock {
        state: AtomicU64,
    }

    impl LoomLock {
        fn new() -> Self {
            Self {
                state: AtomicU64::new(0),
            }
        }

        fn read_lock(&self) -> u64 {
            loop {
                let value = self.state.load(Ordering::Acquire);
                if value & LOCKED_BIT == 0 {
                    return value;
                }
                thread::yield_now();
            }
        }

        fn validate(&self, version: u64) -> bool {
            self.state.load(Ordering::Acquire) == version
        }

        fn upgrade(&self, version: u64) -> bool {
            version & OBSOLETE_BIT == 0
                && self
                    .state
                    .compare_exchange(version, version | LOCKED_BIT, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
        }

        fn write_lock(&self) -> bool {
            loop {
                let version = self.read_lock();
                if version & OBSOLETE_BIT != 0 {
                    return false;
                }
                if self.upgrade(version) {
                    return true;
                }
                thread::yield_now();
            }
        }

        fn unlock(&self) {
            self.state.fetch_add(UNLOCK_DELTA, Ordering::Release);
        }

        fn unlock_obsolete(&self) {
            self.state.fetch_add(UNLOCK_OBSOLETE_DELTA, Ordering::Release);
        }
    }

    /// Two fields a writer keeps equal under the lock.
    struct Guarded {
        lock: LoomLock,
        a: AtomicU64,
        b: AtomicU64,
    }

    #[test]
    fn test_loom_writers_are_exclusive() {
        loom::model(|| {
            let shared = Arc::new(Guarded {
                lock: LoomLock::new(),
                a: AtomicU64::new(0),
                b: AtomicU64::new(0),
            });

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let shared = Arc::clone(&shared);
                    thread::spawn(move || {
                        assert!(shared.lock.write_lock());
                        let a = shared.a.load(Ordering::Relaxed);
                        shared.a.store(a + 1, Ordering::Relaxed);
                        shared.lock.unlock();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(shared.a.load(Ordering::Relaxed), 2);
            assert_eq!(shared.lock.read_lock() >> 2, 2);
        });
    }

    #[test]
    fn test_loom_validated_read_is_consistent() {
        loom::model(|| {
            let shared = Arc::new(Guarded {
                lock: LoomLock::new(),
                a: AtomicU64::new(0),
                b: AtomicU64::new(0),
            });

            let writer = {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    assert!(shared.lock.write_lock());
                    shared.a.store(1, Ordering::Release);
                    shared.b.store(1, Ordering::Release);
                    shared.lock.unlock();
                })
            };

            // Field accesses pair Release stores with Acquire loads, as the
            // node fields do.
            let version = shared.lock.read_lock();
            let a = shared.a.load(Ordering::Acquire);
            let b = shared.b.load(Ordering::Acquire);
            if shared.lock.validate(version) {
                assert_eq!(a, b, "validated snapshot saw a torn write");
            }

            writer.join().unwrap();
        });
    }

    #[test]
    fn test_loom_obsolete_is_terminal() {
        loom::model(|| {
            let lock = Arc::new(LoomLock::new());
            let before = lock.read_lock();

            let retirer = {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    if lock.write_lock() {
                        lock.unlock_obsolete();
                    }
                })
            };

            // A stale upgrade either wins before the retirer or fails.
            if lock.upgrade(before) {
                lock.unlock();
            }
            retirer.join().unwrap();

            let after = lock.read_lock();
            assert_ne!(after & OBSOLETE_BIT, 0);
            assert!(!lock.upgrade(after));
            assert!(!lock.write_lock());
        });
    }
}
