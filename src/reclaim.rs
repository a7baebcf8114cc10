//! Reclaim helpers for seize-based memory reclamation.
//!
//! - Single-allocation reclaimer for `guard.defer_retire()`
//! - Subtree traversal for tree teardown

use seize::{Collector, Guard, LocalGuard};

use crate::node::Node;

/// Reclaim a boxed allocation (seize callback).
///
/// # Safety
///
/// - `ptr` must come from `Box::into_raw` and be reclaimed exactly once.
/// - Must only be called after seize determines it's safe (no readers).
pub(crate) unsafe fn reclaim_boxed<T>(ptr: *mut T, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw.
    // Seize ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
}

/// Defer freeing `ptr` until every guard that could have loaded it exits.
///
/// # Safety
///
/// `ptr` must come from `Box::into_raw`, be unreachable for new traversals,
/// and be retired only once.
#[inline]
pub(crate) unsafe fn retire<T>(guard: &LocalGuard<'_>, ptr: *mut T) {
    // SAFETY: forwarded from the caller.
    unsafe { guard.defer_retire(ptr, reclaim_boxed::<T>) };
}

/// Free every node reachable from `root`, including `root`.
///
/// Inner nodes do not own their children through `Drop`, so the subtree is
/// walked with an explicit stack.
///
/// # Safety
///
/// - Requires exclusive access (no concurrent readers or writers).
/// - Every reachable pointer must come from `Box::into_raw` and must not be
///   pending retirement.
pub(crate) unsafe fn free_subtree<V>(root: *mut Node<V>) {
    let mut stack: Vec<*mut Node<V>> = vec![root];

    while let Some(ptr) = stack.pop() {
        if ptr.is_null() {
            continue;
        }
        // SAFETY: exclusive access, ptr is live and freed once.
        let node: Box<Node<V>> = unsafe { Box::from_raw(ptr) };
        if let Node::Inner(inner) = &*node {
            stack.extend(inner.entries_in_order().into_iter().map(|(_, child)| child));
        }
    }
}
