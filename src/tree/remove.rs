//! Remove path for [`Art`].
//!
//! After unlinking a leaf the node must still be the smallest kind that
//! fits, so removal picks one of three shapes:
//!
//! - **Collapse**: a `Node4` left with a single entry is replaced in its
//!   parent by that entry. An inner survivor absorbs the node's prefix and
//!   the edge byte in front of its own prefix.
//! - **Shrink**: a `Node16`/`Node48`/`Node256` whose remaining children fit
//!   the next smaller kind is rebuilt as that kind.
//! - **In place**: otherwise the entry is erased under the node lock.
//!
//! The root is never collapsed or shrunk.

use std::sync::Arc;

use seize::LocalGuard;

use crate::lock::Restart;
use crate::node::{Edge, Inner, MAX_PREFIX_LEN, Node, NodeKind};
use crate::reclaim::retire;
use crate::stats::{self, COLLAPSE_COUNT, SHRINK_COUNT};
use crate::tracing_helpers::{debug_log, trace_log};

use super::{Art, ParentLink, Visit, node_ref};

impl<V: Send + Sync + 'static> Art<V> {
    /// One remove attempt.
    pub(super) fn try_remove(
        &self,
        key: &[u8],
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, Restart> {
        let mut parent: Option<ParentLink<'_, V>> = None;
        let mut cur: Visit<'_, V> = Visit::root(self.root())?;

        loop {
            let node: &Inner<V> = cur.node;
            if !node.prefix_matches(key, cur.depth) {
                node.lock().read_unlock(cur.version)?;
                return Ok(None);
            }

            let depth: usize = cur.depth + node.prefix_len();
            let edge = Edge::for_key(key, depth);
            let child: *mut Node<V> = node.load(edge);
            node.lock().read_unlock(cur.version)?;

            if child.is_null() {
                return Ok(None);
            }

            // SAFETY: non-null child loaded and validated under `guard`.
            match unsafe { node_ref(child, guard) } {
                Node::Leaf(leaf) if leaf.key() != key => return Ok(None),

                Node::Leaf(leaf) => {
                    match parent {
                        None => Self::erase_in_place(cur, edge)?,
                        Some(link) => Self::unlink(link, cur, edge, key, guard)?,
                    }

                    // SAFETY: the leaf was unlinked under a lock above.
                    unsafe { retire(guard, child) };
                    self.record_remove();
                    return Ok(Some(Arc::clone(leaf.value())));
                }

                Node::Inner(inner) => {
                    parent = Some(cur.link(edge));
                    cur = cur.descend(inner, child, depth)?;
                }
            }
        }
    }

    /// Erase `edge` from `cur` without restructuring it.
    fn erase_in_place(cur: Visit<'_, V>, edge: Edge) -> Result<(), Restart> {
        let _lock = cur.node.lock().upgrade(cur.version)?;
        cur.node.erase(edge);
        Ok(())
    }

    /// Remove the leaf on `edge` of a non-root node, restructuring as needed.
    fn unlink(
        link: ParentLink<'_, V>,
        cur: Visit<'_, V>,
        edge: Edge,
        key: &[u8],
        guard: &LocalGuard<'_>,
    ) -> Result<(), Restart> {
        let node: &Inner<V> = cur.node;
        let kind = node.kind();

        if kind == NodeKind::Node4 && node.entries() <= 2 {
            return Self::collapse(link, cur, edge, key, guard);
        }

        match edge {
            Edge::Byte(byte) if kind.should_shrink(node.count().saturating_sub(1)) => {
                let parent_lock = link.node.lock().upgrade(link.version)?;
                let lock = node.lock().upgrade(cur.version)?;

                let smaller: Inner<V> = node.rebuild(kind.shrunk(), Some(byte));
                let old = link.node.replace(link.edge, Node::boxed_inner(smaller));
                debug_assert_eq!(old, cur.ptr);

                lock.unlock_obsolete();
                drop(parent_lock);

                // SAFETY: the old node is obsolete and unlinked from its parent.
                unsafe { retire(guard, cur.ptr) };
                stats::record(&SHRINK_COUNT);
                debug_log!(from = ?kind, "remove: shrink");
                Ok(())
            }
            _ => Self::erase_in_place(cur, edge),
        }
    }

    /// Replace a `Node4` that is about to lose its second-to-last entry by
    /// the entry that remains.
    fn collapse(
        link: ParentLink<'_, V>,
        cur: Visit<'_, V>,
        edge: Edge,
        key: &[u8],
        guard: &LocalGuard<'_>,
    ) -> Result<(), Restart> {
        let node: &Inner<V> = cur.node;
        let parent_lock = link.node.lock().upgrade(link.version)?;
        let lock = node.lock().upgrade(cur.version)?;

        let survivor = node
            .entries_in_order()
            .into_iter()
            .find(|&(e, _)| e != edge);

        match survivor {
            None => {
                link.node.erase(link.edge);
            }

            Some((Edge::Terminal, only)) => {
                link.node.replace(link.edge, only);
            }

            Some((Edge::Byte(byte), only)) => {
                // SAFETY: loaded from a locked node under `guard`.
                if let Node::Inner(below) = unsafe { node_ref(only, guard) } {
                    let below_lock = below.lock().write_lock()?;

                    // The removed key matched this node's full prefix, so its
                    // bytes stand in for any prefix bytes not stored inline.
                    let plen: usize = node.prefix_len();
                    let below_len: usize = below.prefix_len();
                    let mut merged: Vec<u8> = Vec::with_capacity(MAX_PREFIX_LEN);
                    merged.extend_from_slice(key.get(cur.depth..cur.depth + plen).ok_or(Restart)?);
                    merged.push(byte);
                    merged.extend((0..below_len.min(MAX_PREFIX_LEN)).map(|i| below.prefix_byte(i)));
                    merged.truncate(MAX_PREFIX_LEN);

                    below.set_prefix(&merged, plen + 1 + below_len);
                    drop(below_lock);
                }
                link.node.replace(link.edge, only);
            }
        }

        lock.unlock_obsolete();
        drop(parent_lock);

        // SAFETY: the node is obsolete and unlinked from its parent.
        unsafe { retire(guard, cur.ptr) };
        stats::record(&COLLAPSE_COUNT);
        trace_log!(depth = cur.depth, "remove: collapse");
        Ok(())
    }
}
