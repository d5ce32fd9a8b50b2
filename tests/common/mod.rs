//! Shared helpers for the integration tests.

#![allow(dead_code)]

/// Install a test logger once per test binary. `RUST_LOG=trace` shows every
/// operation scope.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Group sizes exercised by most tests: the degenerate group, even and odd
/// groups, and a non power of two.
pub const GROUP_SIZES: [usize; 5] = [1, 2, 3, 4, 7];

/// `0 + 1 + ... + (n - 1)`.
pub fn triangle(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}
