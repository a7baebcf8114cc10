//! `Art` - a concurrent adaptive radix tree with optimistic lock coupling.
//!
//! The root is a permanent `Node256` with an empty prefix. It never grows,
//! shrinks, collapses or becomes obsolete, so every other node always has a
//! parent to re-link it.
//!
//! # Depth convention
//!
//! A node reached at depth `d` with prefix length `p` covers key bytes
//! `d..d + p`. Its terminal slot holds the key of length `d + p`, and the
//! child for byte `key[d + p]` is reached at depth `d + p + 1`.
//!
//! # Restarts
//!
//! Each operation is written as a `try_*` attempt that returns
//! `Err(Restart)` as soon as a version check fails. The public wrappers
//! retry from the root with a spin-then-yield backoff; callers never see a
//! restart.

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use seize::{Collector, LocalGuard};

use crate::iter::Iter;
use crate::lock::{Backoff, Restart, Version};
use crate::node::{Edge, Inner, Node, NodeKind};
use crate::reclaim::free_subtree;
use crate::stats::{self, RESTART_COUNT};

mod insert;
mod optimistic;
mod remove;

use insert::{InsertMode, InsertOutcome};

// ============================================================================
//  Helpers
// ============================================================================

/// Dereference a node pointer for the lifetime of `guard`.
///
/// # Safety
///
/// `ptr` must be non-null, come from `Box::into_raw`, and have been loaded
/// while `guard` was active.
#[inline]
pub(crate) unsafe fn node_ref<'g, V>(ptr: *mut Node<V>, _guard: &'g LocalGuard<'_>) -> &'g Node<V> {
    // SAFETY: guaranteed by the caller; seize keeps retired nodes alive
    // until the guard exits.
    unsafe { &*ptr }
}

/// Run an optimistic attempt until it completes.
#[inline]
pub(crate) fn retry<T>(mut attempt: impl FnMut() -> Result<T, Restart>) -> T {
    let mut backoff = Backoff::new();
    loop {
        match attempt() {
            Ok(value) => return value,
            Err(Restart) => {
                stats::record(&RESTART_COUNT);
                backoff.snooze();
            }
        }
    }
}

/// How the node being visited hangs off its parent.
pub(crate) struct ParentLink<'g, V> {
    /// The parent inner node.
    pub(crate) node: &'g Inner<V>,
    /// Snapshot of the parent taken on the way down.
    pub(crate) version: Version,
    /// Edge of the parent that leads to the visited node.
    pub(crate) edge: Edge,
}

impl<V> Clone for ParentLink<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for ParentLink<'_, V> {}

/// The inner node an attempt is currently visiting.
pub(crate) struct Visit<'g, V> {
    /// The node itself.
    pub(crate) node: &'g Inner<V>,
    /// Its allocation, or null for the root (which is never retired).
    pub(crate) ptr: *mut Node<V>,
    /// Snapshot taken when the node was entered.
    pub(crate) version: Version,
    /// Depth at which the node was reached (before its prefix).
    pub(crate) depth: usize,
}

impl<V> Clone for Visit<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Visit<'_, V> {}

impl<'g, V> Visit<'g, V> {
    /// Enter the root.
    pub(crate) fn root(node: &'g Inner<V>) -> Result<Self, Restart> {
        Ok(Self {
            node,
            ptr: StdPtr::null_mut(),
            version: node.lock().read_lock_or_restart()?,
            depth: 0,
        })
    }

    /// Lock-couple into `child` (an inner node reached through `edge` with
    /// its prefix ending at `depth`): snapshot the child, then validate this
    /// node so the child pointer is known to be current.
    pub(crate) fn descend(
        self,
        child: &'g Inner<V>,
        ptr: *mut Node<V>,
        depth: usize,
    ) -> Result<Self, Restart> {
        let version = child.lock().read_lock_or_restart()?;
        self.node.lock().read_unlock(self.version)?;
        Ok(Self {
            node: child,
            ptr,
            version,
            depth: depth + 1,
        })
    }

    /// The link from this node to a child on `edge`.
    pub(crate) const fn link(self, edge: Edge) -> ParentLink<'g, V> {
        ParentLink {
            node: self.node,
            version: self.version,
            edge,
        }
    }
}

/// Length of the common prefix of `a` and `b`.
#[inline]
pub(crate) fn common_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// ============================================================================
//  NodeStats
// ============================================================================

/// Shape of the tree, as counted by [`Art::node_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Inner nodes of kind [`NodeKind::Node4`].
    pub node4: usize,
    /// Inner nodes of kind [`NodeKind::Node16`].
    pub node16: usize,
    /// Inner nodes of kind [`NodeKind::Node48`].
    pub node48: usize,
    /// Inner nodes of kind [`NodeKind::Node256`] (including the root).
    pub node256: usize,
    /// Leaves.
    pub leaves: usize,
    /// Longest root-to-leaf path, counted in nodes.
    pub max_depth: usize,
}

impl NodeStats {
    /// Number of inner nodes of `kind`.
    #[must_use]
    pub const fn count(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Node4 => self.node4,
            NodeKind::Node16 => self.node16,
            NodeKind::Node48 => self.node48,
            NodeKind::Node256 => self.node256,
        }
    }
}

// ============================================================================
//  Art
// ============================================================================

/// A concurrent, ordered map from byte strings to `Arc<V>`.
///
/// All operations take `&self`; share the tree with `Arc<Art<V>>`.
///
/// # Example
///
/// ```
/// use mvart::Art;
///
/// let tree: Art<u64> = Art::new();
/// assert!(tree.insert(b"hello", 1).is_none());
/// assert_eq!(tree.insert(b"hello", 2).as_deref(), Some(&1));
/// assert_eq!(tree.search(b"hello").as_deref(), Some(&2));
/// assert_eq!(tree.remove(b"hello").as_deref(), Some(&2));
/// assert!(tree.search(b"hello").is_none());
/// ```
pub struct Art<V> {
    /// Memory reclamation collector for safe concurrent access.
    collector: Collector,

    /// Permanent root.
    root: Box<Inner<V>>,

    /// Number of keys in the tree (atomic for concurrent access).
    count: AtomicUsize,

    /// The tree owns `V` through raw node pointers.
    _marker: PhantomData<Box<Node<V>>>,
}

impl<V> StdFmt::Debug for Art<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Art")
            .field("count", &self.count.load(AtomicOrdering::Relaxed))
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<V> Drop for Art<V> {
    fn drop(&mut self) {
        // Drop requires unique access, so no traversal is in flight.
        for (_, child) in self.root.entries_in_order() {
            // SAFETY: every reachable child is live and owned by the tree.
            unsafe { free_subtree(child) };
        }
    }
}

impl<V: Send + Sync + 'static> Default for Art<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> Art<V> {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
            root: Box::new(Inner::new(NodeKind::Node256, &[], 0)),
            count: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Enter a protected region and return a guard.
    ///
    /// The guard protects any nodes loaded during its lifetime from being
    /// reclaimed. Pass it to the `*_with_guard` methods to amortize guard
    /// overhead across many operations.
    #[must_use]
    #[inline(always)]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Number of keys in the tree.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(AtomicOrdering::Relaxed)
    }

    /// Whether the tree holds no keys.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn root(&self) -> &Inner<V> {
        &self.root
    }

    // ------------------------------------------------------------------------
    //  Point operations
    // ------------------------------------------------------------------------

    /// Look up `key`.
    #[must_use]
    pub fn search(&self, key: &[u8]) -> Option<Arc<V>> {
        let guard = self.guard();
        self.search_with_guard(key, &guard)
    }

    /// Look up `key` using an explicit guard.
    #[must_use]
    pub fn search_with_guard(&self, key: &[u8], guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        retry(|| self.try_search(key, guard))
    }

    /// Insert or overwrite `key`, returning the previous value if the key
    /// was already present.
    pub fn insert(&self, key: &[u8], value: V) -> Option<Arc<V>> {
        let guard = self.guard();
        self.insert_with_guard(key, Arc::new(value), &guard)
    }

    /// Insert or overwrite `key` with a shared value using an explicit guard.
    pub fn insert_with_guard(
        &self,
        key: &[u8],
        value: Arc<V>,
        guard: &LocalGuard<'_>,
    ) -> Option<Arc<V>> {
        match retry(|| self.try_insert(key, &value, InsertMode::Upsert, guard)) {
            InsertOutcome::Inserted => None,
            InsertOutcome::Replaced(old) | InsertOutcome::Existing(old) => Some(old),
        }
    }

    /// Return the value for `key`, inserting `make()` if it is absent.
    ///
    /// Concurrent callers racing on the same absent key all receive the one
    /// value that won the insert. `make` runs at most once, and may run
    /// even if another thread's value ends up stored.
    pub fn get_or_insert_with(&self, key: &[u8], make: impl FnOnce() -> V) -> Arc<V> {
        let guard = self.guard();
        self.get_or_insert_with_guard(key, make, &guard)
    }

    /// [`get_or_insert_with`](Self::get_or_insert_with) using an explicit guard.
    pub fn get_or_insert_with_guard(
        &self,
        key: &[u8],
        make: impl FnOnce() -> V,
        guard: &LocalGuard<'_>,
    ) -> Arc<V> {
        if let Some(found) = self.search_with_guard(key, guard) {
            return found;
        }
        let value = Arc::new(make());
        match retry(|| self.try_insert(key, &value, InsertMode::IfAbsent, guard)) {
            InsertOutcome::Inserted => value,
            InsertOutcome::Existing(found) | InsertOutcome::Replaced(found) => found,
        }
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &[u8]) -> Option<Arc<V>> {
        let guard = self.guard();
        self.remove_with_guard(key, &guard)
    }

    /// Remove `key` using an explicit guard.
    pub fn remove_with_guard(&self, key: &[u8], guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        retry(|| self.try_remove(key, guard))
    }

    // ------------------------------------------------------------------------
    //  Range and diagnostics
    // ------------------------------------------------------------------------

    /// Iterate keys in `(start, end]` in ascending order.
    ///
    /// Call [`Iter::reverse`] to walk `[start, end)` in descending order
    /// instead. `None` leaves that side unbounded.
    #[must_use]
    pub fn iter(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Iter<'_, V> {
        Iter::new(self, start, end)
    }

    /// Count nodes by kind.
    ///
    /// Walks the tree without validation. Under concurrent modification the
    /// result is approximate.
    #[must_use]
    pub fn node_stats(&self) -> NodeStats {
        let guard = self.guard();
        let mut stats = NodeStats {
            node256: 1,
            max_depth: 1,
            ..NodeStats::default()
        };
        let mut stack: Vec<(*mut Node<V>, usize)> = self
            .root
            .entries_in_order()
            .into_iter()
            .map(|(_, child)| (child, 2))
            .collect();

        while let Some((ptr, depth)) = stack.pop() {
            stats.max_depth = stats.max_depth.max(depth);
            // SAFETY: loaded under `guard` from a live parent.
            match unsafe { node_ref(ptr, &guard) } {
                Node::Leaf(_) => stats.leaves += 1,
                Node::Inner(inner) => {
                    match inner.kind() {
                        NodeKind::Node4 => stats.node4 += 1,
                        NodeKind::Node16 => stats.node16 += 1,
                        NodeKind::Node48 => stats.node48 += 1,
                        NodeKind::Node256 => stats.node256 += 1,
                    }
                    stack.extend(
                        inner
                            .entries_in_order()
                            .into_iter()
                            .map(|(_, child)| (child, depth + 1)),
                    );
                }
            }
        }
        stats
    }

    #[inline]
    fn record_insert(&self) {
        self.count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    #[inline]
    fn record_remove(&self) {
        self.count.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
#[expect(clippy::cast_possible_truncation, reason = "reasonable in tests")]
mod tests {
    use std::collections::BTreeMap;
    use std::thread;

    use super::*;

    // ========================================================================
    // Send/Sync Verification
    // ========================================================================

    fn _assert_send_sync()
    where
        Art<u64>: Send + Sync,
    {
    }

    fn kinds(tree: &Art<u64>) -> (usize, usize, usize, usize) {
        let s = tree.node_stats();
        (s.node4, s.node16, s.node48, s.node256 - 1)
    }

    // ========================================================================
    //  Basic Tests
    // ========================================================================

    #[test]
    fn test_new_tree_is_empty() {
        let tree: Art<u64> = Art::new();

        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.search(b"hello").is_none());
        assert!(tree.search(b"").is_none());
        assert!(tree.remove(b"hello").is_none());
    }

    #[test]
    fn test_insert_and_search() {
        let tree: Art<u64> = Art::new();

        assert!(tree.insert(b"hello", 42).is_none());
        assert_eq!(*tree.search(b"hello").unwrap(), 42);
        assert!(tree.search(b"hell").is_none());
        assert!(tree.search(b"helloX").is_none());
        assert!(tree.search(b"world").is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_insert_returns_previous() {
        let tree: Art<u64> = Art::new();

        tree.insert(b"key", 1);
        let old = tree.insert(b"key", 2);

        assert_eq!(*old.unwrap(), 1);
        assert_eq!(*tree.search(b"key").unwrap(), 2);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_remove() {
        let tree: Art<u64> = Art::new();

        tree.insert(b"a", 1);
        tree.insert(b"b", 2);

        assert_eq!(*tree.remove(b"a").unwrap(), 1);
        assert!(tree.search(b"a").is_none());
        assert!(tree.remove(b"a").is_none());
        assert!(tree.remove(b"never").is_none());
        assert_eq!(*tree.search(b"b").unwrap(), 2);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_empty_key() {
        let tree: Art<u64> = Art::new();

        tree.insert(b"", 7);
        tree.insert(b"a", 8);

        assert_eq!(*tree.search(b"").unwrap(), 7);
        assert_eq!(*tree.remove(b"").unwrap(), 7);
        assert!(tree.search(b"").is_none());
        assert_eq!(*tree.search(b"a").unwrap(), 8);
    }

    #[test]
    fn test_keys_that_prefix_each_other() {
        let tree: Art<u64> = Art::new();
        let keys: [&[u8]; 5] = [b"a", b"ab", b"abc", b"abcd", b"abd"];

        for (i, key) in keys.iter().enumerate() {
            tree.insert(key, i as u64);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(*tree.search(key).unwrap(), i as u64, "key {key:?}");
        }
        assert!(tree.search(b"abcde").is_none());
        assert!(tree.search(b"ac").is_none());

        assert_eq!(*tree.remove(b"ab").unwrap(), 1);
        assert_eq!(*tree.remove(b"abc").unwrap(), 2);
        assert_eq!(*tree.search(b"abcd").unwrap(), 3);
        assert_eq!(*tree.search(b"abd").unwrap(), 4);
        assert_eq!(*tree.search(b"a").unwrap(), 0);
    }

    #[test]
    fn test_binary_keys() {
        let tree: Art<u64> = Art::new();

        tree.insert(&[0x00, 0x01, 0x02, 0x00, 0xFF], 1);
        tree.insert(&[0x00, 0x01, 0x02, 0x00], 2);
        tree.insert(&[0xFF; 3], 3);

        assert_eq!(*tree.search(&[0x00, 0x01, 0x02, 0x00, 0xFF]).unwrap(), 1);
        assert_eq!(*tree.search(&[0x00, 0x01, 0x02, 0x00]).unwrap(), 2);
        assert_eq!(*tree.search(&[0xFF; 3]).unwrap(), 3);
    }

    // ========================================================================
    //  Prefix Tests
    // ========================================================================

    #[test]
    fn test_long_shared_prefix() {
        let tree: Art<u64> = Art::new();
        let base = b"this-prefix-is-longer-than-ten-bytes/";

        for i in 0..20u64 {
            let key = [&base[..], format!("{i:03}").as_bytes()].concat();
            tree.insert(&key, i);
        }
        for i in 0..20u64 {
            let key = [&base[..], format!("{i:03}").as_bytes()].concat();
            assert_eq!(*tree.search(&key).unwrap(), i);
        }

        // Diverges past the inline prefix bytes.
        assert!(tree.search(b"this-prefix-is-NOT-longer-than-ten-bytes/001").is_none());
        assert!(tree.search(b"this-prefix").is_none());
    }

    #[test]
    fn test_prefix_split_inside_long_prefix() {
        let tree: Art<u64> = Art::new();

        tree.insert(b"0123456789abcdefghij-1", 1);
        tree.insert(b"0123456789abcdefghij-2", 2);
        // Diverges at byte 15, beyond the inline prefix.
        tree.insert(b"0123456789abcdeXYZ", 3);
        // Ends inside the prefix.
        tree.insert(b"0123456789abc", 4);

        assert_eq!(*tree.search(b"0123456789abcdefghij-1").unwrap(), 1);
        assert_eq!(*tree.search(b"0123456789abcdefghij-2").unwrap(), 2);
        assert_eq!(*tree.search(b"0123456789abcdeXYZ").unwrap(), 3);
        assert_eq!(*tree.search(b"0123456789abc").unwrap(), 4);
        assert!(tree.search(b"0123456789abcdef").is_none());
    }

    #[test]
    fn test_collapse_concatenates_prefix() {
        let tree: Art<u64> = Art::new();

        tree.insert(b"prefix-a-long-tail-1", 1);
        tree.insert(b"prefix-a-long-tail-2", 2);
        tree.insert(b"prefix-b", 3);

        assert_eq!(*tree.remove(b"prefix-b").unwrap(), 3);

        assert_eq!(*tree.search(b"prefix-a-long-tail-1").unwrap(), 1);
        assert_eq!(*tree.search(b"prefix-a-long-tail-2").unwrap(), 2);
        assert!(tree.search(b"prefix-a").is_none());

        // Splitting the collapsed prefix again still works.
        tree.insert(b"prefix-a-long", 4);
        assert_eq!(*tree.search(b"prefix-a-long").unwrap(), 4);
        assert_eq!(*tree.search(b"prefix-a-long-tail-1").unwrap(), 1);
    }

    // ========================================================================
    //  Growth / Shrink Tests
    // ========================================================================

    fn child_key(b: u8) -> [u8; 2] {
        [b'x', b]
    }

    #[test]
    fn test_growth_thresholds() {
        let tree: Art<u64> = Art::new();

        for b in 0..4u8 {
            tree.insert(&child_key(b), u64::from(b));
        }
        assert_eq!(kinds(&tree), (1, 0, 0, 0));

        tree.insert(&child_key(4), 4);
        assert_eq!(kinds(&tree), (0, 1, 0, 0));

        for b in 5..16u8 {
            tree.insert(&child_key(b), u64::from(b));
        }
        assert_eq!(kinds(&tree), (0, 1, 0, 0));
        tree.insert(&child_key(16), 16);
        assert_eq!(kinds(&tree), (0, 0, 1, 0));

        for b in 17..48u8 {
            tree.insert(&child_key(b), u64::from(b));
        }
        assert_eq!(kinds(&tree), (0, 0, 1, 0));
        tree.insert(&child_key(48), 48);
        assert_eq!(kinds(&tree), (0, 0, 0, 1));

        for b in 0..=48u8 {
            assert_eq!(*tree.search(&child_key(b)).unwrap(), u64::from(b));
        }
    }

    #[test]
    fn test_shrink_and_collapse() {
        let tree: Art<u64> = Art::new();
        for b in 0..=48u8 {
            tree.insert(&child_key(b), u64::from(b));
        }
        assert_eq!(kinds(&tree), (0, 0, 0, 1));

        tree.remove(&child_key(48));
        assert_eq!(kinds(&tree), (0, 0, 1, 0));

        for b in 16..48u8 {
            tree.remove(&child_key(b));
        }
        assert_eq!(kinds(&tree), (0, 1, 0, 0));

        for b in 4..16u8 {
            tree.remove(&child_key(b));
        }
        assert_eq!(kinds(&tree), (1, 0, 0, 0));

        for b in 1..4u8 {
            tree.remove(&child_key(b));
        }
        // The last Node4 collapsed into its remaining leaf.
        assert_eq!(kinds(&tree), (0, 0, 0, 0));
        assert_eq!(tree.node_stats().leaves, 1);
        assert_eq!(*tree.search(&child_key(0)).unwrap(), 0);
    }

    // ========================================================================
    //  Differential Tests
    // ========================================================================

    #[test]
    fn test_differential_against_btreemap() {
        let tree: Art<u64> = Art::new();
        let mut model: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        // Deterministic LCG so the mix of prefixes is reproducible.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for i in 0..5_000u64 {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let len = (state >> 60) as usize;
            let key: Vec<u8> = (0..len).map(|j| b"abc"[((state >> (j * 3)) % 3) as usize]).collect();

            if state % 4 == 0 {
                assert_eq!(tree.remove(&key).map(|v| *v), model.remove(&key), "op {i}");
            } else {
                assert_eq!(tree.insert(&key, i).map(|v| *v), model.insert(key, i), "op {i}");
            }
        }

        assert_eq!(tree.len(), model.len());
        for (key, value) in &model {
            assert_eq!(*tree.search(key).unwrap(), *value);
        }
    }

    #[test]
    fn test_get_or_insert_with_keeps_first() {
        let tree: Art<u64> = Art::new();

        let first = tree.get_or_insert_with(b"k", || 1);
        let second = tree.get_or_insert_with(b"k", || 2);

        assert_eq!(*first, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tree.len(), 1);
    }

    // ========================================================================
    //  Concurrent Smoke Tests
    // ========================================================================

    #[test]
    fn test_concurrent_get_or_insert_single_winner() {
        let tree: Arc<Art<u64>> = Arc::new(Art::new());

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    (0..200u64)
                        .map(|i| *tree.get_or_insert_with(format!("key-{i}").as_bytes(), || t))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for i in 0..200 {
            let winner = *tree.search(format!("key-{i}").as_bytes()).unwrap();
            assert!(results.iter().all(|r| r[i] == winner));
        }
        assert_eq!(tree.len(), 200);
    }

    #[test]
    fn test_concurrent_insert_remove_disjoint() {
        let tree: Arc<Art<u64>> = Arc::new(Art::new());

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for i in 0..2_000u64 {
                        let key = ((t << 32) | i).to_be_bytes();
                        tree.insert(&key, i);
                        if i % 2 == 0 {
                            assert_eq!(*tree.remove(&key).unwrap(), i);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tree.len(), 4 * 1_000);
        for t in 0..4u64 {
            for i in 0..2_000u64 {
                let found = tree.search(&((t << 32) | i).to_be_bytes()).map(|v| *v);
                assert_eq!(found, (i % 2 == 1).then_some(i));
            }
        }
    }
}
