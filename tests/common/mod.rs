//! Shared tracing setup for integration tests.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//! }
//! ```
//!
//! # Configuration
//!
//! - `RUST_LOG`: filter directives (e.g. `mvart=debug,mvart::tree=trace`)
//! - `MVART_LOG_DIR`: log directory (default: `logs/`)
//! - `MVART_LOG_CONSOLE`: set to "0" to disable console output
//!
//! Events are appended to `logs/mvart.jsonl` as NDJSON:
//!
//! ```bash
//! # Restarts and structural changes only
//! jq 'select(.fields.message | test("grow|shrink|collapse"))' logs/mvart.jsonl
//!
//! # GC sweeps
//! jq 'select(.fields.message == "gc: sweep")' logs/mvart.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the console and file subscribers once per test binary.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

/// Where and how test logs are written.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub log_dir: PathBuf,
    pub log_file: String,
    pub console_enabled: bool,
    /// Used when `RUST_LOG` is unset.
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "mvart.jsonl".to_string(),
            console_enabled: true,
            default_level: Level::INFO,
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var("MVART_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if env::var("MVART_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console_enabled = false;
        }
        config
    }
}

fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()))
}

#[expect(clippy::expect_used)]
fn setup_tracing() {
    let config = TracingConfig::from_env();
    std::fs::create_dir_all(&config.log_dir).expect("Failed to create log directory");

    // Append: nextest runs each test in its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join(&config.log_file))
        .expect("Failed to open log file");

    let console_layer = config.console_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_target(true)
            .compact()
            .with_filter(make_filter(config.default_level))
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(make_filter(config.default_level));

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init() {
        init_tracing();
        init_tracing();
        tracing::info!(key = "k", ts = 7, "tracing initialized");
    }
}
