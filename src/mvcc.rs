//! Multi-version timestamp-ordered transactions over an [`Art`].
//!
//! A [`Store`] maps each key to a version chain. Transactions read the
//! version whose `[begin_ts, end_ts)` contains their read timestamp and
//! stage writes as uncommitted versions at the head of each chain:
//!
//! ```text
//! begin_at(read_ts) ──► get / set ... ──┬──► commit_at(commit_ts)
//!                                       └──► discard (or drop)
//! ```
//!
//! Write admission follows timestamp ordering: a write is refused if the
//! version it would supersede was read, or committed, above the writer's
//! read timestamp.
//!
//! # Garbage collection
//!
//! Open transactions register their read timestamp. Versions no open or
//! future transaction can see are trimmed by [`Store::gc`], or on commit
//! with [`StoreConfig::inline_gc`]. Future transactions are bounded by
//! [`Store::advance_watermark`]: opening a transaction below the watermark
//! may observe trimmed history.
//!
//! # Example
//!
//! ```rust
//! use mvart::{Store, TxnError};
//!
//! let store: Store<u64> = Store::new();
//!
//! let mut writer = store.begin_at(1, true);
//! writer.set(b"hello", 1)?;
//!
//! let reader = store.begin_at(2, false);
//! assert_eq!(reader.get(b"hello"), Err(TxnError::KeyNotExists));
//! drop(reader);
//!
//! writer.commit_at(1)?;
//! assert_eq!(*store.begin_at(2, false).get(b"hello")?, 1);
//! # Ok::<(), TxnError>(())
//! ```

mod chain;
mod gc;
mod ids;
mod txn;

use std::collections::BTreeMap;
use std::fmt as StdFmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::tracing_helpers::warn_log;
use crate::tree::Art;

pub(crate) use chain::VersionChain;
pub use gc::GcStats;
pub use ids::IdAllocator;
pub use txn::{Txn, TxnIter};

/// A transactional key/value store.
pub struct Store<V> {
    tree: Art<VersionChain<V>>,
    ids: Arc<IdAllocator>,
    /// Open transactions, counted per read timestamp.
    active: Mutex<BTreeMap<u64, usize>>,
    watermark: AtomicU64,
    config: StoreConfig,
}

impl<V: Send + Sync + 'static> StdFmt::Debug for Store<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.tree.len())
            .field("active", &*self.active.lock())
            .field("watermark", &self.watermark.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<V: Send + Sync + 'static> Default for Store<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> Store<V> {
    /// An empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// An empty store with its own id allocator.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_ids(config, Arc::new(IdAllocator::new()))
    }

    /// An empty store drawing transaction ids from `ids`.
    #[must_use]
    pub fn with_ids(config: StoreConfig, ids: Arc<IdAllocator>) -> Self {
        Self {
            tree: Art::new(),
            ids,
            active: Mutex::new(BTreeMap::new()),
            watermark: AtomicU64::new(0),
            config,
        }
    }

    /// The configuration this store was built with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The id allocator transactions draw from.
    #[must_use]
    pub fn ids(&self) -> &Arc<IdAllocator> {
        &self.ids
    }

    /// Number of keys that were ever written (committed or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether no key was ever written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Open a transaction reading as of `read_ts`.
    ///
    /// Only `update` transactions may [`set`](Txn::set).
    #[must_use]
    pub fn begin_at(&self, read_ts: u64, update: bool) -> Txn<'_, V> {
        let watermark = self.watermark();
        if read_ts < watermark {
            warn_log!(read_ts, watermark, "begin_at: read timestamp below watermark");
        }
        self.register(read_ts);
        Txn::new(self, self.ids.allocate(), read_ts, update)
    }

    /// Promise that no transaction will be opened below `ts` from now on.
    ///
    /// The watermark never moves backwards.
    pub fn advance_watermark(&self, ts: u64) {
        self.watermark.fetch_max(ts, Ordering::AcqRel);
    }

    /// Current watermark.
    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Oldest read timestamp among open transactions.
    #[must_use]
    pub fn oldest_active(&self) -> Option<u64> {
        self.active.lock().keys().next().copied()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    /// Highest timestamp no open or future reader can go below.
    ///
    /// Read under the registry lock so a transaction registering at or
    /// above the watermark cannot slip under the returned value.
    #[must_use]
    pub fn safepoint(&self) -> u64 {
        let active = self.active.lock();
        let watermark = self.watermark();
        active
            .keys()
            .next()
            .map_or(watermark, |&oldest| oldest.min(watermark))
    }

    pub(crate) const fn tree(&self) -> &Art<VersionChain<V>> {
        &self.tree
    }

    fn register(&self, read_ts: u64) {
        *self.active.lock().entry(read_ts).or_insert(0) += 1;
    }

    pub(crate) fn release(&self, read_ts: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&read_ts) {
            *count -= 1;
            if *count == 0 {
                active.remove(&read_ts);
            }
        }
    }
}
