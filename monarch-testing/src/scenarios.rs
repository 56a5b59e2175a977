use anyhow::Result;
use monarch_core::ParticipantId;
use monarch_elector::ElectorConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cluster::ElectionCluster;
use crate::fault_injection::FaultType;

#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub participant_ids: Vec<String>,
    pub config: ElectorConfig,
    /// (delay after the previous step, fault)
    pub faults: Vec<(Duration, FaultType)>,
    /// Time allowed to converge after the last fault
    pub settle: Duration,
    pub expected_outcome: ExpectedOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedOutcome {
    /// Exactly one participant leads, whichever it is
    SingleLeader,
    /// Exactly this participant leads
    LeaderIs(String),
    /// Nobody in the cluster leads
    NoLeader,
}

#[derive(Debug, Clone)]
pub struct ActualOutcome {
    pub leaders: Vec<ParticipantId>,
    pub claim_epochs: Vec<u64>,
}

#[derive(Debug)]
pub struct TestResult {
    pub scenario: String,
    pub success: bool,
    pub actual_outcome: ActualOutcome,
    pub details: String,
}

impl ActualOutcome {
    /// Successive claims never reuse or lower an epoch.
    pub fn epochs_increase(&self) -> bool {
        self.claim_epochs.windows(2).all(|pair| pair[0] < pair[1])
    }
}

/// Build a cluster for `scenario`, start everyone, inject its faults and
/// report what it converged to. Must run inside a tokio runtime.
pub async fn run_scenario(scenario: &TestScenario) -> Result<TestResult> {
    info!("Running test scenario: {}", scenario.name);

    let cluster =
        ElectionCluster::with_participants(scenario.config.clone(), scenario.participant_ids.iter().cloned())?;
    cluster.start_all();

    for (delay, fault) in &scenario.faults {
        cluster.advance(*delay).await;
        cluster.apply_fault(fault)?;
    }
    cluster.advance(scenario.settle).await;

    let actual_outcome = ActualOutcome {
        leaders: cluster.leaders(),
        claim_epochs: cluster.claim_epochs(),
    };
    let success = check_expected_outcome(&scenario.expected_outcome, &actual_outcome);
    if !success {
        warn!(
            "Scenario {} failed: expected {:?}, got {:?}",
            scenario.name, scenario.expected_outcome, actual_outcome
        );
    }

    cluster.stop_all();

    Ok(TestResult {
        scenario: scenario.name.clone(),
        success,
        details: format!(
            "Expected: {:?}, Actual: {:?}",
            scenario.expected_outcome, actual_outcome
        ),
        actual_outcome,
    })
}

fn check_expected_outcome(expected: &ExpectedOutcome, actual: &ActualOutcome) -> bool {
    if !actual.epochs_increase() {
        return false;
    }

    match expected {
        ExpectedOutcome::SingleLeader => actual.leaders.len() == 1,
        ExpectedOutcome::LeaderIs(id) => {
            actual.leaders.len() == 1 && actual.leaders[0].as_str() == id
        }
        ExpectedOutcome::NoLeader => actual.leaders.is_empty(),
    }
}

fn fast_config() -> ElectorConfig {
    ElectorConfig::default()
        .with_lease_duration(Duration::from_millis(500))
        .with_renew_interval(Duration::from_millis(100))
        .with_election_backoff(Duration::from_millis(10), Duration::from_millis(20))
        .with_recheck_delay(Duration::from_millis(50))
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn create_test_scenarios() -> Vec<TestScenario> {
    vec![
        TestScenario {
            name: "Steady State".to_string(),
            description: "Three participants, no faults".to_string(),
            participant_ids: ids(&["alpha", "bravo", "charlie"]),
            config: fast_config(),
            faults: vec![],
            settle: Duration::from_secs(2),
            expected_outcome: ExpectedOutcome::LeaderIs("charlie".to_string()),
        },
        TestScenario {
            name: "Leader Crash".to_string(),
            description: "The leader vanishes without stepping down".to_string(),
            participant_ids: ids(&["alpha", "bravo", "charlie"]),
            config: fast_config(),
            faults: vec![(
                Duration::from_millis(200),
                FaultType::StopParticipant {
                    index: 2,
                    graceful: false,
                },
            )],
            settle: Duration::from_secs(1),
            expected_outcome: ExpectedOutcome::SingleLeader,
        },
        TestScenario {
            name: "Graceful Handover".to_string(),
            description: "The leader steps down and a survivor takes over".to_string(),
            participant_ids: ids(&["alpha", "bravo"]),
            config: fast_config(),
            faults: vec![(
                Duration::from_millis(200),
                FaultType::StopParticipant {
                    index: 1,
                    graceful: true,
                },
            )],
            settle: Duration::from_millis(100),
            expected_outcome: ExpectedOutcome::LeaderIs("alpha".to_string()),
        },
        TestScenario {
            name: "Lossy Bus".to_string(),
            description: "Half of all bus deliveries are lost".to_string(),
            participant_ids: ids(&["alpha", "bravo", "charlie", "delta"]),
            config: fast_config(),
            faults: vec![(Duration::ZERO, FaultType::BusLoss { rate: 0.5 })],
            settle: Duration::from_secs(3),
            expected_outcome: ExpectedOutcome::SingleLeader,
        },
        TestScenario {
            name: "Foreign Claim".to_string(),
            description: "An outsider overwrites the slot with a long lease".to_string(),
            participant_ids: ids(&["alpha", "bravo"]),
            config: fast_config(),
            faults: vec![(
                Duration::from_millis(200),
                FaultType::ForeignClaim {
                    leader: "outsider".to_string(),
                    epoch: 50,
                    lease: Duration::from_secs(60),
                },
            )],
            settle: Duration::from_millis(300),
            expected_outcome: ExpectedOutcome::NoLeader,
        },
        TestScenario {
            name: "Everyone Leaves".to_string(),
            description: "All participants stop; nobody may still claim leadership".to_string(),
            participant_ids: ids(&["alpha", "bravo"]),
            config: fast_config(),
            faults: vec![
                (
                    Duration::from_millis(200),
                    FaultType::StopParticipant {
                        index: 0,
                        graceful: true,
                    },
                ),
                (
                    Duration::ZERO,
                    FaultType::StopParticipant {
                        index: 1,
                        graceful: true,
                    },
                ),
            ],
            settle: Duration::from_millis(100),
            expected_outcome: ExpectedOutcome::NoLeader,
        },
    ]
}
