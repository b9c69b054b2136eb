//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG`; without it the ledger logs at `info`
//! (tests: `debug` for the ledger crates, `warn` for everything else).

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const TEST_FILTER: &str = "warn,drumledger_infra=debug";

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(DEFAULT_FILTER))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact output through the libtest writer so it only shows for failing tests.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(TEST_FILTER))
        .with_test_writer()
        .compact()
        .try_init();
}
