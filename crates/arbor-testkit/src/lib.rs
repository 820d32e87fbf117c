//! # Arbor Testkit
//!
//! Test utilities for the arbor graph client:
//! - [`MemoryStore`], an in-memory graph store speaking the REST routes and
//!   the batch endpoint, with a request journal and failure injection
//! - [`init_tracing`] for log output inside tests

pub mod memory;

pub use memory::MemoryStore;

use tracing_subscriber::{fmt, EnvFilter};

/// Base URL the memory store answers under.
pub const TEST_BASE_URL: &str = "http://localhost:7474/db/data";

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
