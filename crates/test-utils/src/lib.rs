//! Shared test utilities for Quarry crates.
//!
//! Provides the helpers integration tests lean on:
//!
//! - [`TestDir`] - managed temporary directory with path helpers
//! - [`assert_eventually`] - poll a condition until it holds or times out
//! - [`mini_cluster`] - an in-process master plus simulated tablet
//!   servers, heartbeating for real on a fast cadence
//! - [`init_test_logging`] - opt-in tracing output for test debugging

#![deny(unsafe_code)]
// Test utilities are allowed to panic; that is their failure mode.
#![allow(clippy::expect_used)]

mod assertions;
pub use assertions::assert_eventually;

mod test_dir;
pub use test_dir::TestDir;

pub mod mini_cluster;
pub use mini_cluster::{MiniCluster, MiniClusterOptions, MiniMaster, MiniTabletServer};

/// Initializes tracing output for a test binary.
///
/// Respects `RUST_LOG`; safe to call from every test, only the first call
/// installs the subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
