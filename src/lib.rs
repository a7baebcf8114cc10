//! # `mvart`
//!
//! A concurrent adaptive radix tree with a multi-version transaction layer.
//!
//! - [`Art`]: an ordered map from byte strings to `Arc<V>`. Inner nodes
//!   adapt their fan-out (4/16/48/256 children) and compress shared
//!   prefixes. Readers never block; writers lock only the nodes they change
//!   and restart on conflict (optimistic lock coupling).
//! - [`Store`]: multi-version timestamp ordering on top of the tree. Each
//!   key maps to a chain of versions; transactions read as of a timestamp
//!   and commit at a timestamp.
//!
//! ## Thread Safety
//!
//! `Art<V>` and `Store<V>` are `Send + Sync` when `V: Send + Sync`. Every
//! operation takes `&self`:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use mvart::Art;
//!
//! let tree: Arc<Art<u64>> = Arc::new(Art::new());
//! let handles: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let tree = Arc::clone(&tree);
//!         thread::spawn(move || {
//!             for i in 0..100u64 {
//!                 tree.insert(&(t * 100 + i).to_be_bytes(), i);
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(tree.len(), 400);
//! ```
//!
//! ## Keys
//!
//! Keys are arbitrary byte strings, compared lexicographically. The empty
//! key and keys that are prefixes of other keys are allowed.
//!
//! ## Memory Reclamation
//!
//! Replaced nodes and trimmed versions are retired through `seize` and
//! freed once no guard can still observe them. Long-lived iterators hold a
//! guard and delay reclamation.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::inline_always)]

pub mod lock;
pub mod ordering;
pub mod stats;

mod config;
mod error;
mod iter;
mod mvcc;
mod node;
mod reclaim;
mod tracing_helpers;
mod tree;

pub use config::StoreConfig;
pub use error::TxnError;
pub use iter::Iter;
pub use mvcc::{GcStats, IdAllocator, Store, Txn, TxnIter};
pub use node::{MAX_PREFIX_LEN, NodeKind};
pub use tree::{Art, NodeStats};
