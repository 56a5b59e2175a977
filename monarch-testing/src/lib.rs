//! # Monarch Testing
//!
//! Harnesses for exercising Monarch electors together: a cluster of real
//! electors on one in-memory store and bus, switchable store failures, and
//! scripted fault scenarios.
//!
//! ## Example
//!
//! ```rust
//! use monarch_elector::ElectorConfig;
//! use monarch_testing::ElectionCluster;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = ElectorConfig::default()
//!     .with_election_backoff(Duration::from_millis(5), Duration::from_millis(10));
//! let cluster = ElectionCluster::with_participants(config, ["a", "b"]).unwrap();
//! cluster.start_all();
//!
//! let leader = cluster.wait_for_leader(Duration::from_secs(1)).await.unwrap();
//! assert_eq!(leader.as_str(), "b");
//! # });
//! ```

pub mod cluster;
pub mod fault_injection;
pub mod scenarios;

pub use cluster::{ElectionCluster, Member};
pub use fault_injection::{FaultType, FlakyStore};
pub use scenarios::{
    create_test_scenarios, run_scenario, ActualOutcome, ExpectedOutcome, TestResult, TestScenario,
};

use tracing_subscriber::EnvFilter;

/// Install a WARN-level subscriber unless `RUST_LOG` says otherwise.
/// Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
