//! Standard memory orderings for concurrent node and version access.
//!
//! Every atomic in the tree and the version chains goes through one of
//! these, so the pairing between a writer's publish and a reader's load is
//! visible at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading child pointers, prefixes and version fields during
/// optimistic traversal. Pairs with writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing node fields under lock.
/// Pairs with reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success.
/// Used for lock upgrade, chain head swaps and version write locks.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure.
/// Only need to see the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for relaxed loads (within locked region) and statistics.
/// Safe because lock provides synchronization.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for reading a lock word.
/// Must see lock and obsolete bit updates.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Ordering for write unlock (clear lock bit + increment).
/// Must be visible to waiting readers.
pub const UNLOCK_ORD: Ordering = Ordering::Release;
