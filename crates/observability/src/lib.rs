//! Tracing and logging setup shared by ledger binaries and tests.

/// Initialize process-wide logging (JSON lines, `RUST_LOG` filter).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize logging for tests: human-readable output captured by the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
