//! Errors surfaced by the transaction layer.
//!
//! Tree operations never fail from the caller's point of view; optimistic
//! races are retried internally. Only [`Txn`](crate::Txn) methods return
//! [`TxnError`].

use thiserror::Error;

/// Why a transactional read, write or commit did not take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TxnError {
    /// No version of the key is visible at the transaction's read timestamp.
    #[error("key does not exist at this read timestamp")]
    KeyNotExists,

    /// The visible version is write-locked by another open transaction.
    #[error("another transaction holds the write lock on this key")]
    AnotherTxnHeldWLock,

    /// Another open transaction already holds the write lock this write needs.
    #[error("failed to acquire the write lock on this key")]
    FailedToAcquireWLock,

    /// Another reader at or above this transaction's read timestamp, or a
    /// newer committer, got to the key first; restart with a later read
    /// timestamp.
    ///
    /// A reader that was itself refused with
    /// [`AnotherTxnHeldWLock`](Self::AnotherTxnHeldWLock) still counts, so
    /// this can surface after the lock holder aborted.
    #[error("write conflicts with a read or commit at a later timestamp")]
    WriteConflicts,

    /// The transaction was opened without `update`.
    #[error("transaction is read-only")]
    ReadOnly,

    /// `commit_ts` was below the transaction's read timestamp.
    #[error("commit timestamp precedes the read timestamp")]
    CommitBeforeRead,
}

impl TxnError {
    /// Whether retrying the same transaction later may succeed.
    ///
    /// Lock contention clears once the holder finishes. Ordering violations
    /// need a fresh transaction at a later read timestamp.
    #[must_use]
    pub const fn is_contention(self) -> bool {
        matches!(self, Self::AnotherTxnHeldWLock | Self::FailedToAcquireWLock)
    }
}
