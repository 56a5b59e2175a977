//! A coordination domain of real electors on one in-memory store and bus.
//!
//! Every participant shares one [`TokioClock`], so under a paused tokio
//! runtime the whole cluster runs on virtual time and tests can step it
//! with [`ElectionCluster::advance`].

use anyhow::{anyhow, Result};
use monarch_bus::{BusConfig, BusEndpoint, InMemoryBus};
use monarch_core::{
    Clock, LeaderRecord, ParticipantId, RecordStore, SequenceIdGenerator, TokioClock,
};
use monarch_elector::{Elector, ElectorConfig, LeaderElector};
use monarch_store::{ChangeNotification, SharedRecordStore, StoreConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::fault_injection::{FaultType, FlakyStore};

/// One participant of an [`ElectionCluster`] with its fault switches.
pub struct Member {
    pub elector: LeaderElector,
    pub endpoint: BusEndpoint,
    pub store: FlakyStore,
}

impl Member {
    pub fn id(&self) -> ParticipantId {
        self.elector.participant_id()
    }
}

pub struct ElectionCluster {
    config: ElectorConfig,
    store: SharedRecordStore,
    bus: InMemoryBus,
    clock: Arc<TokioClock>,
    members: Vec<Member>,
    audit: Mutex<broadcast::Receiver<ChangeNotification>>,
    writes: Mutex<Vec<LeaderRecord>>,
}

impl ElectionCluster {
    /// Must be called from inside a tokio runtime.
    pub fn new(config: ElectorConfig) -> Self {
        let store = SharedRecordStore::new(StoreConfig::default());
        let audit = Mutex::new(store.audit());

        Self {
            config,
            store,
            bus: InMemoryBus::new(BusConfig::default()),
            clock: Arc::new(TokioClock::new()),
            members: Vec::new(),
            audit,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Cluster with one participant per identity, none of them started.
    pub fn with_participants<I, S>(config: ElectorConfig, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cluster = Self::new(config);
        for id in ids {
            cluster.add_participant(id)?;
        }
        Ok(cluster)
    }

    pub fn add_participant(&mut self, id: impl Into<String>) -> Result<usize> {
        let endpoint = self.bus.endpoint();
        let store = FlakyStore::new(self.store.connect());
        let elector = LeaderElector::with_capabilities(
            self.config.clone(),
            Arc::new(store.clone()),
            Arc::new(endpoint.clone()),
            self.clock.clone(),
            &SequenceIdGenerator::new([id.into()]),
        )?;

        self.members.push(Member {
            elector,
            endpoint,
            store,
        });
        Ok(self.members.len() - 1)
    }

    pub fn member(&self, index: usize) -> Result<&Member> {
        self.members
            .get(index)
            .ok_or_else(|| anyhow!("no participant at index {}", index))
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn start(&self, index: usize) -> Result<()> {
        self.member(index)?.elector.start();
        Ok(())
    }

    pub fn start_all(&self) {
        for member in &self.members {
            member.elector.start();
        }
    }

    /// Stop gracefully: a leader broadcasts its step-down.
    pub fn stop(&self, index: usize) -> Result<()> {
        self.member(index)?.elector.stop();
        Ok(())
    }

    /// Stop without a word on the bus, as if the process had vanished.
    pub fn crash(&self, index: usize) -> Result<()> {
        let member = self.member(index)?;
        member.endpoint.set_isolated(true);
        member.elector.stop();
        info!("Participant {} crashed", member.id());
        Ok(())
    }

    pub fn stop_all(&self) {
        for member in &self.members {
            member.elector.stop();
        }
    }

    pub fn is_leader(&self, index: usize) -> bool {
        self.members
            .get(index)
            .map(|member| member.elector.is_leader())
            .unwrap_or(false)
    }

    pub fn leaders(&self) -> Vec<ParticipantId> {
        self.members
            .iter()
            .filter(|member| member.elector.is_leader())
            .map(Member::id)
            .collect()
    }

    /// The single leader, or `None` if there is none or more than one.
    pub fn leader(&self) -> Option<ParticipantId> {
        let mut leaders = self.leaders();
        if leaders.len() == 1 {
            leaders.pop()
        } else {
            None
        }
    }

    pub fn stored_record(&self) -> Option<LeaderRecord> {
        self.store.connect().read(&self.config.record_key).ok().flatten()
    }

    pub fn overwrite_record(&self, record: &LeaderRecord) -> Result<()> {
        self.store.connect().write(&self.config.record_key, record)?;
        Ok(())
    }

    /// Every record written to the slot so far, in write order.
    pub fn write_history(&self) -> Vec<LeaderRecord> {
        let mut audit = self.audit.lock();
        let mut writes = self.writes.lock();
        while let Ok(notification) = audit.try_recv() {
            if let Some(record) = notification.record {
                writes.push(record);
            }
        }
        writes.clone()
    }

    /// Epochs of successive claims, with renewals collapsed.
    pub fn claim_epochs(&self) -> Vec<u64> {
        let mut epochs: Vec<u64> = Vec::new();
        let mut last: Option<(ParticipantId, u64)> = None;
        for record in self.write_history() {
            let claim = (record.leader_id.clone(), record.epoch);
            if last.as_ref() != Some(&claim) {
                epochs.push(record.epoch);
                last = Some(claim);
            }
        }
        epochs
    }

    pub fn apply_fault(&self, fault: &FaultType) -> Result<()> {
        info!("Injecting fault: {:?}", fault);
        match fault {
            FaultType::IsolateParticipant { index } => {
                self.member(*index)?.endpoint.set_isolated(true)
            }
            FaultType::ReconnectParticipant { index } => {
                self.member(*index)?.endpoint.set_isolated(false)
            }
            FaultType::StopParticipant { index, graceful } => {
                if *graceful {
                    self.stop(*index)?
                } else {
                    self.crash(*index)?
                }
            }
            FaultType::BusLoss { rate } => self.bus.set_loss_rate(*rate),
            FaultType::StoreReadFailure { index, failing } => {
                self.member(*index)?.store.set_fail_reads(*failing)
            }
            FaultType::StoreWriteFailure { index, failing } => {
                self.member(*index)?.store.set_fail_writes(*failing)
            }
            FaultType::ForeignClaim {
                leader,
                epoch,
                lease,
            } => {
                let record = LeaderRecord::new(
                    ParticipantId::from(leader.as_str()),
                    *epoch,
                    self.now() + lease.as_millis() as u64,
                );
                self.overwrite_record(&record)?
            }
        }
        Ok(())
    }

    /// Let virtual (or real) time pass while the electors run.
    pub async fn advance(&self, by: Duration) {
        tokio::time::sleep(by).await;
    }

    /// Poll until exactly one participant leads.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<ParticipantId> {
        let step = Duration::from_millis(5);
        let mut waited = Duration::ZERO;
        loop {
            if let Some(leader) = self.leader() {
                return Ok(leader);
            }
            if waited >= timeout {
                return Err(anyhow!(
                    "no single leader after {:?} (leaders: {:?})",
                    timeout,
                    self.leaders()
                ));
            }
            self.advance(step).await;
            waited += step;
        }
    }

    pub fn config(&self) -> &ElectorConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    /// The clock shared by every member; hand it to electors created
    /// outside the cluster.
    pub fn clock(&self) -> Arc<TokioClock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }
}
