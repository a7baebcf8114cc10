//! Transaction id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of transaction ids.
///
/// Id `0` marks an unlocked version, so allocation starts at `1`. A store
/// creates its own allocator unless one is passed in; share one allocator
/// between stores whose transactions must never collide.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// An allocator whose first id is `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out a fresh id.
    ///
    /// # Panics
    ///
    /// Panics if the id space is exhausted.
    #[must_use]
    pub fn allocate(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        assert_ne!(id, u64::MAX, "transaction id space exhausted");
        id
    }

    /// The id the next call to [`allocate`](Self::allocate) would return.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
