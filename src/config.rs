//! Store configuration.

/// Tunables for a [`Store`](crate::Store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Trim the chains a transaction wrote as part of its commit.
    ///
    /// Keeps chain length bounded without a separate sweeper, at the cost
    /// of extra work on the commit path.
    pub inline_gc: bool,

    /// Chains holding fewer versions than this are skipped by trimming.
    pub gc_min_chain_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            inline_gc: false,
            gc_min_chain_len: 2,
        }
    }
}

impl StoreConfig {
    /// Enable or disable trimming on commit.
    #[must_use]
    pub const fn with_inline_gc(mut self, enabled: bool) -> Self {
        self.inline_gc = enabled;
        self
    }

    /// Set the shortest chain worth trimming. Values below 2 are treated as 2.
    #[must_use]
    pub const fn with_gc_min_chain_len(mut self, len: usize) -> Self {
        self.gc_min_chain_len = if len < 2 { 2 } else { len };
        self
    }
}
