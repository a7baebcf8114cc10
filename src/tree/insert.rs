//! Insert path for [`Art`].
//!
//! Every structural change locks exactly the nodes whose fields it writes:
//!
//! | case                         | locks            | effect                                  |
//! |------------------------------|------------------|-----------------------------------------|
//! | empty slot, room in body     | node             | child or terminal stored in place       |
//! | empty slot, body full        | parent, node     | node replaced by the next larger kind   |
//! | leaf with the same key       | node             | leaf swapped for a new one (upsert)     |
//! | leaf with a different key    | node             | leaf replaced by a `Node4` holding both |
//! | key diverges inside a prefix | parent, node     | `Node4` inserted above the node         |
//!
//! Locks are taken top-down with [`OptLock::upgrade`](crate::lock::OptLock::upgrade),
//! which never blocks: a failed upgrade drops whatever was already held and
//! the attempt restarts.

use std::sync::Arc;

use seize::LocalGuard;

use crate::lock::Restart;
use crate::node::{Edge, Inner, Node, NodeKind};
use crate::reclaim::retire;
use crate::stats::{self, GROW_COUNT, PREFIX_SPLIT_COUNT};
use crate::tracing_helpers::{debug_log, trace_log};

use super::{Art, ParentLink, Visit, common_len, node_ref};

/// What to do when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InsertMode {
    /// Replace the stored value.
    Upsert,
    /// Keep the stored value and report it.
    IfAbsent,
}

/// Result of one successful insert attempt.
#[derive(Debug)]
pub(super) enum InsertOutcome<V> {
    /// The key was absent and is now stored.
    Inserted,
    /// The key was present; its previous value was replaced.
    Replaced(Arc<V>),
    /// The key was present and left untouched ([`InsertMode::IfAbsent`]).
    Existing(Arc<V>),
}

impl<V: Send + Sync + 'static> Art<V> {
    /// One insert attempt.
    pub(super) fn try_insert(
        &self,
        key: &[u8],
        value: &Arc<V>,
        mode: InsertMode,
        guard: &LocalGuard<'_>,
    ) -> Result<InsertOutcome<V>, Restart> {
        let mut parent: Option<ParentLink<'_, V>> = None;
        let mut cur: Visit<'_, V> = Visit::root(self.root())?;

        loop {
            let node: &Inner<V> = cur.node;
            let prefix: Vec<u8> = node.full_prefix(cur.depth)?;
            let rest: &[u8] = key.get(cur.depth..).ok_or(Restart)?;
            let at: usize = common_len(&prefix, rest);

            if at < prefix.len() {
                let link = parent.ok_or(Restart)?;
                Self::split_prefix(link, cur, &prefix, at, key, value)?;
                self.record_insert();
                return Ok(InsertOutcome::Inserted);
            }

            let depth: usize = cur.depth + prefix.len();
            let edge = Edge::for_key(key, depth);
            let child: *mut Node<V> = node.load(edge);
            node.lock().read_unlock(cur.version)?;

            if child.is_null() {
                Self::add_leaf(parent, cur, edge, key, value, guard)?;
                self.record_insert();
                return Ok(InsertOutcome::Inserted);
            }

            // SAFETY: non-null child loaded and validated under `guard`.
            match unsafe { node_ref(child, guard) } {
                Node::Leaf(leaf) if leaf.key() == key => {
                    if mode == InsertMode::IfAbsent {
                        return Ok(InsertOutcome::Existing(Arc::clone(leaf.value())));
                    }

                    let lock = node.lock().upgrade(cur.version)?;
                    let old = node.replace(edge, Node::new_leaf(key, Arc::clone(value)));
                    drop(lock);
                    debug_assert_eq!(old, child);

                    // SAFETY: `old` was unlinked under the node lock.
                    unsafe { retire(guard, old) };
                    return Ok(InsertOutcome::Replaced(Arc::clone(leaf.value())));
                }

                Node::Leaf(leaf) => {
                    let lock = node.lock().upgrade(cur.version)?;
                    let below: usize = depth + 1;
                    let (Some(ours), Some(theirs)) = (key.get(below..), leaf.key().get(below..))
                    else {
                        return Err(Restart);
                    };

                    let common: usize = common_len(ours, theirs);
                    let split: Inner<V> = Inner::new(NodeKind::Node4, &ours[..common], common);
                    split.place(Edge::for_key(leaf.key(), below + common), child);
                    split.place(
                        Edge::for_key(key, below + common),
                        Node::new_leaf(key, Arc::clone(value)),
                    );
                    node.replace(edge, Node::boxed_inner(split));
                    drop(lock);

                    trace_log!(depth, common, "insert: leaf split");
                    self.record_insert();
                    return Ok(InsertOutcome::Inserted);
                }

                Node::Inner(inner) => {
                    parent = Some(cur.link(edge));
                    cur = cur.descend(inner, child, depth)?;
                }
            }
        }
    }

    /// Store a new leaf on an empty `edge` of `cur`, growing the node if its
    /// body is full.
    fn add_leaf(
        parent: Option<ParentLink<'_, V>>,
        cur: Visit<'_, V>,
        edge: Edge,
        key: &[u8],
        value: &Arc<V>,
        guard: &LocalGuard<'_>,
    ) -> Result<(), Restart> {
        let node: &Inner<V> = cur.node;

        let byte: u8 = match edge {
            Edge::Byte(byte) if node.is_full() => byte,
            _ => {
                let _lock = node.lock().upgrade(cur.version)?;
                node.place(edge, Node::new_leaf(key, Arc::clone(value)));
                return Ok(());
            }
        };

        // A full root would have had a child for every byte.
        let link: ParentLink<'_, V> = parent.ok_or(Restart)?;
        let parent_lock = link.node.lock().upgrade(link.version)?;
        let lock = node.lock().upgrade(cur.version)?;

        let grown: Inner<V> = node.rebuild(node.kind().grown(), None);
        grown.insert_child(byte, Node::new_leaf(key, Arc::clone(value)));
        let old = link.node.replace(link.edge, Node::boxed_inner(grown));
        debug_assert_eq!(old, cur.ptr);

        lock.unlock_obsolete();
        drop(parent_lock);

        // SAFETY: the old node is obsolete and unlinked from its parent.
        unsafe { retire(guard, cur.ptr) };
        stats::record(&GROW_COUNT);
        debug_log!(from = ?node.kind(), "insert: grow");
        Ok(())
    }

    /// Insert a `Node4` above `cur` holding the first `at` prefix bytes,
    /// with `cur` (its prefix shortened) and the new leaf below it.
    fn split_prefix(
        link: ParentLink<'_, V>,
        cur: Visit<'_, V>,
        prefix: &[u8],
        at: usize,
        key: &[u8],
        value: &Arc<V>,
    ) -> Result<(), Restart> {
        let parent_lock = link.node.lock().upgrade(link.version)?;
        let lock = cur.node.lock().upgrade(cur.version)?;

        let split: Inner<V> = Inner::new(NodeKind::Node4, &prefix[..at], at);
        split.place(
            Edge::for_key(key, cur.depth + at),
            Node::new_leaf(key, Arc::clone(value)),
        );
        split.insert_child(prefix[at], cur.ptr);
        cur.node.set_prefix(&prefix[at + 1..], prefix.len() - at - 1);
        link.node.replace(link.edge, Node::boxed_inner(split));

        drop(lock);
        drop(parent_lock);

        stats::record(&PREFIX_SPLIT_COUNT);
        trace_log!(depth = cur.depth, at, "insert: prefix split");
        Ok(())
    }
}
