//! Logging macros that vanish without the `tracing` feature.
//!
//! Hot paths (restarts, node rebuilds, chain trims) log through these so a
//! default build carries no formatting or dispatch cost:
//!
//! ```bash
//! RUST_LOG=mvart::tree=trace cargo test --features tracing concurrent_growth
//! RUST_LOG=mvart::mvcc=debug cargo run --features tracing
//! ```
//!
//! Levels in use:
//! - `trace_log!`: per-operation structural events (split, collapse, iterator recovery)
//! - `debug_log!`: grow/shrink and GC sweep summaries
//! - `warn_log!`: misuse the store tolerates, such as reading below the watermark

#![allow(unused_macros, unused_imports)]

#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
