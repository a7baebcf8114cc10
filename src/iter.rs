//! Range iterator over an [`Art`].
//!
//! The cursor keeps a stack of checkpoints, one per inner node on the path
//! to the current position. Each checkpoint records the node, the version
//! it had when entered, and the last position visited in it (the terminal
//! at position 0, child `b` at `b + 1`).
//!
//! Before trusting an entry loaded from a checkpoint the cursor re-validates
//! that checkpoint's version. On failure it discards invalid checkpoints
//! from the top and resumes at the deepest checkpoint that still validates
//! (or at the root). A checkpoint on the path of the last yielded key is
//! re-sought strictly past that key. A checkpoint entered after it, with
//! nothing yielded below it yet, holds only keys past it and restarts at
//! its first entry.
//!
//! The scan is weakly consistent: a key present for the whole scan is
//! yielded exactly once; keys inserted or removed during the scan may or
//! may not appear.
//!
//! # Bounds
//!
//! - Forward: `start < key <= end`, ascending.
//! - Reverse: `start <= key < end`, descending.

use std::fmt as StdFmt;
use std::sync::Arc;

use seize::LocalGuard;

use crate::lock::{Backoff, Restart, Version};
use crate::node::{Edge, Inner, Node};
use crate::stats::{self, ITER_RECOVERY_COUNT};
use crate::tracing_helpers::trace_log;
use crate::tree::Art;

/// Position before the terminal slot.
const BEFORE_ALL: i32 = -1;

/// Position after child 255.
const AFTER_ALL: i32 = 257;

/// One level of the cursor.
struct Checkpoint<V> {
    node: *const Inner<V>,
    version: Version,
    depth: usize,
    pos: i32,
    /// Whether the resume bound's path runs through this node.
    on_path: bool,
}

/// Ordered, weakly consistent cursor returned by [`Art::iter`].
///
/// Holds a reclamation guard for its whole lifetime, so long-lived
/// iterators delay memory reuse.
pub struct Iter<'t, V> {
    tree: &'t Art<V>,
    guard: LocalGuard<'t>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    forward: bool,
    stack: Vec<Checkpoint<V>>,
    last: Option<Vec<u8>>,
    started: bool,
    done: bool,
}

impl<V> StdFmt::Debug for Iter<'_, V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Iter")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("forward", &self.forward)
            .field("depth", &self.stack.len())
            .field("last", &self.last)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'t, V: Send + Sync + 'static> Iter<'t, V> {
    pub(crate) fn new(tree: &'t Art<V>, start: Option<&[u8]>, end: Option<&[u8]>) -> Self {
        Self {
            tree,
            guard: tree.guard(),
            start: start.map(<[u8]>::to_vec),
            end: end.map(<[u8]>::to_vec),
            forward: true,
            stack: Vec::new(),
            last: None,
            started: false,
            done: false,
        }
    }

    /// Walk the range in descending order, yielding `start <= key < end`.
    ///
    /// Calling this after iteration began restarts the scan from the
    /// beginning in the new direction.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.forward = !self.forward;
        self.stack.clear();
        self.last = None;
        self.started = false;
        self.done = false;
        self
    }

    /// Exclusive bound the scan resumes after.
    fn resume_bound(&self) -> Option<&[u8]> {
        self.last.as_deref().or(if self.forward {
            self.start.as_deref()
        } else {
            self.end.as_deref()
        })
    }

    /// Whether `key` lies past the inclusive stop bound.
    fn past_stop(&self, key: &[u8]) -> bool {
        if self.forward {
            self.end.as_deref().is_some_and(|end| key > end)
        } else {
            self.start.as_deref().is_some_and(|start| key < start)
        }
    }

    // ------------------------------------------------------------------------
    //  Seeking
    // ------------------------------------------------------------------------

    /// Dereference an entry loaded while this iterator's guard was held.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and loaded from a validated node.
    unsafe fn entry(&self, ptr: *mut Node<V>) -> &'t Node<V> {
        // SAFETY: the guard outlives every reference handed out here.
        unsafe { &*ptr }
    }

    fn push(&mut self, node: &Inner<V>, version: Version, depth: usize, pos: i32) {
        self.stack.push(Checkpoint {
            node,
            version,
            depth,
            pos,
            on_path: true,
        });
    }

    /// Push a node `step` descends into ahead of the resume bound.
    fn push_unvisited(&mut self, node: &Inner<V>, version: Version, depth: usize) {
        let pos = if self.forward { BEFORE_ALL } else { AFTER_ALL };
        self.stack.push(Checkpoint {
            node,
            version,
            depth,
            pos,
            on_path: false,
        });
    }

    /// Every checkpoint is an ancestor of the key just yielded.
    fn mark_on_path(&mut self) {
        for checkpoint in self.stack.iter_mut().rev() {
            if checkpoint.on_path {
                break;
            }
            checkpoint.on_path = true;
        }
    }

    /// Position the cursor at `node` (snapshot `version`, reached at
    /// `depth`) so the next entry is the first one strictly past `bound`.
    fn seek_from(
        &mut self,
        mut node: &'t Inner<V>,
        mut version: Version,
        mut depth: usize,
        bound: Option<&[u8]>,
    ) -> Result<(), Restart> {
        let forward = self.forward;
        let Some(bound) = bound else {
            self.push(node, version, depth, if forward { BEFORE_ALL } else { AFTER_ALL });
            return Ok(());
        };

        loop {
            let prefix: Vec<u8> = node.full_prefix(depth)?;
            node.lock().read_unlock(version)?;

            let rest: &[u8] = bound.get(depth..).unwrap_or_default();
            let n: usize = prefix.len().min(rest.len());
            // Is the whole subtree past the bound in scan direction?
            let subtree_after: Option<bool> = match prefix[..n].cmp(&rest[..n]) {
                std::cmp::Ordering::Greater => Some(forward),
                std::cmp::Ordering::Less => Some(!forward),
                std::cmp::Ordering::Equal if rest.len() < prefix.len() => Some(forward),
                std::cmp::Ordering::Equal => None,
            };
            match subtree_after {
                Some(true) => {
                    let pos = if forward { BEFORE_ALL } else { AFTER_ALL };
                    self.push(node, version, depth, pos);
                    return Ok(());
                }
                Some(false) => return Ok(()),
                None => {}
            }

            let end_of_prefix: usize = depth + prefix.len();
            let Some(&byte) = bound.get(end_of_prefix) else {
                // The bound is this node's terminal key: skip it going
                // forward, everything here is above it going backward.
                if forward {
                    self.push(node, version, depth, 0);
                }
                return Ok(());
            };

            let pos: i32 = i32::from(byte) + 1;
            let child: *mut Node<V> = node.load(Edge::Byte(byte));
            node.lock().read_unlock(version)?;

            if child.is_null() {
                self.push(node, version, depth, pos);
                return Ok(());
            }

            // SAFETY: non-null child loaded and validated under the guard.
            match unsafe { self.entry(child) } {
                Node::Leaf(leaf) => {
                    let include = if forward {
                        leaf.key() > bound
                    } else {
                        leaf.key() < bound
                    };
                    let at = match (include, forward) {
                        (false, _) => pos,
                        (true, true) => pos - 1,
                        (true, false) => pos + 1,
                    };
                    self.push(node, version, depth, at);
                    return Ok(());
                }
                Node::Inner(inner) => {
                    let child_version = inner.lock().read_lock_or_restart()?;
                    node.lock().read_unlock(version)?;
                    self.push(node, version, depth, pos);
                    node = inner;
                    version = child_version;
                    depth = end_of_prefix + 1;
                }
            }
        }
    }

    /// Seek from the root, retrying until a consistent path is found.
    fn seek_root(&mut self) {
        let tree: &'t Art<V> = self.tree;
        let mut backoff = Backoff::new();
        loop {
            self.stack.clear();
            let root: &'t Inner<V> = tree.root();
            let bound: Option<Vec<u8>> = self.resume_bound().map(<[u8]>::to_vec);
            let attempt = root
                .lock()
                .read_lock_or_restart()
                .and_then(|version| self.seek_from(root, version, 0, bound.as_deref()));
            if attempt.is_ok() {
                return;
            }
            stats::record(&ITER_RECOVERY_COUNT);
            backoff.snooze();
        }
    }

    /// Rebuild the cursor after a checkpoint failed validation.
    fn recover(&mut self) {
        stats::record(&ITER_RECOVERY_COUNT);
        let bound: Option<Vec<u8>> = self.resume_bound().map(<[u8]>::to_vec);

        while let Some(top) = self.stack.pop() {
            // SAFETY: checkpoint nodes were loaded under the guard.
            let node: &'t Inner<V> = unsafe { &*top.node };
            if node.lock().read_unlock(top.version).is_err() {
                continue;
            }
            trace_log!(depth = top.depth, on_path = top.on_path, "iter: resume from checkpoint");
            if !top.on_path {
                self.push_unvisited(node, top.version, top.depth);
                return;
            }
            if self
                .seek_from(node, top.version, top.depth, bound.as_deref())
                .is_ok()
            {
                return;
            }
        }
        self.seek_root();
    }

    /// Advance to the next leaf in scan order.
    fn step(&mut self) -> Option<(Vec<u8>, Arc<V>)> {
        loop {
            let top = self.stack.last()?;
            // SAFETY: checkpoint nodes were loaded under the guard.
            let node: &Inner<V> = unsafe { &*top.node };
            let next = if self.forward {
                node.next_entry(top.pos)
            } else {
                node.prev_entry(top.pos)
            };
            let (version, depth) = (top.version, top.depth);
            if node.lock().read_unlock(version).is_err() {
                self.recover();
                continue;
            }

            let Some((pos, child)) = next else {
                self.stack.pop();
                continue;
            };
            if let Some(top) = self.stack.last_mut() {
                top.pos = pos;
            }

            // SAFETY: non-null entry loaded and validated under the guard.
            match unsafe { self.entry(child) } {
                Node::Leaf(leaf) => {
                    if self.past_stop(leaf.key()) {
                        return None;
                    }
                    let key: Vec<u8> = leaf.key().to_vec();
                    self.last = Some(key.clone());
                    self.mark_on_path();
                    return Some((key, Arc::clone(leaf.value())));
                }
                Node::Inner(inner) => {
                    let below: usize = depth + node.prefix_len() + 1;
                    let Ok(child_version) = inner.lock().read_lock_or_restart() else {
                        self.recover();
                        continue;
                    };
                    if node.lock().read_unlock(version).is_err() {
                        self.recover();
                        continue;
                    }
                    self.push_unvisited(inner, child_version, below);
                }
            }
        }
    }
}

impl<V: Send + Sync + 'static> Iterator for Iter<'_, V> {
    type Item = (Vec<u8>, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            self.seek_root();
        }
        let item = self.step();
        if item.is_none() {
            self.done = true;
            self.stack.clear();
        }
        item
    }
}

// ============================================================================
//  Tests
// ============================================================================
