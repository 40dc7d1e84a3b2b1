// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the Migration stage machine.
//!
//! These tests verify stage sequences across the migration lifecycle
//! WITHOUT requiring a live Kubernetes cluster. External collaborators
//! (volume driver, rule engine, cluster pair) are mocked and the stage
//! decisions are delegated to the production decision functions, so the
//! tests stay in sync with the controller automatically.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run a specific scenario
//! cargo test --test functional happy_path
//! ```

mod mock_collaborators;
mod prop_tests;
mod scenario_tests;

/// Install a test subscriber so `RUST_LOG` controls controller output.
/// Safe to call from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
