//! Optimistic point lookup for [`Art`].
//!
//! # Protocol
//!
//! ```text
//! 1. guard = tree.guard()
//! 2. v = node.read_lock_or_restart()
//! 3. check inline prefix, load child for the next key byte
//! 4. node.read_unlock(v)          -- child pointer is now trustworthy
//! 5. leaf:  compare full key, clone Arc
//!    inner: cv = child.read_lock_or_restart(); node.read_unlock(v); descend
//! ```
//!
//! Prefix bytes beyond [`MAX_PREFIX_LEN`](crate::node::MAX_PREFIX_LEN) are
//! skipped on the way down; the full-key comparison at the leaf catches a
//! divergence there.

use std::sync::Arc;

use seize::LocalGuard;

use crate::lock::Restart;
use crate::node::{Edge, Inner, Node};
use crate::tracing_helpers::trace_log;

use super::{Art, node_ref};

impl<V: Send + Sync + 'static> Art<V> {
    /// One lookup attempt.
    pub(super) fn try_search(
        &self,
        key: &[u8],
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, Restart> {
        let mut node: &Inner<V> = self.root();
        let mut version = node.lock().read_lock_or_restart()?;
        let mut depth: usize = 0;

        loop {
            if !node.prefix_matches(key, depth) {
                node.lock().read_unlock(version)?;
                return Ok(None);
            }
            depth += node.prefix_len();

            let child: *mut Node<V> = node.load(Edge::for_key(key, depth));
            node.lock().read_unlock(version)?;

            if child.is_null() {
                return Ok(None);
            }

            // SAFETY: non-null child loaded and validated under `guard`.
            match unsafe { node_ref(child, guard) } {
                Node::Leaf(leaf) => {
                    return Ok((leaf.key() == key).then(|| Arc::clone(leaf.value())));
                }

                Node::Inner(inner) => {
                    let child_version = inner.lock().read_lock_or_restart()?;
                    node.lock().read_unlock(version)?;
                    trace_log!(depth, "search: descend");
                    node = inner;
                    version = child_version;
                    depth += 1;
                }
            }
        }
    }
}
