//! The election state machine of one participant.
//!
//! [`ElectionMachine`] is purely synchronous: every input (start, stop, a bus
//! message, a store change, the clock passing a timer deadline) is one method
//! call that runs a complete transition. Store reads and writes happen inside
//! the transition. The reactor in [`crate::elector`] serializes the calls and
//! sleeps until [`ElectionMachine::next_deadline`].
//!
//! Store and bus failures never surface as errors here. A failed read is
//! treated as an empty slot and a failed write or publish is logged; the
//! fencing check on the next renewal tick corrects any optimism this causes.

use crate::config::ElectorConfig;
use crate::timers::{TimerKind, TimerSet};
use monarch_core::{
    BroadcastBus, Clock, ElectionMessage, ElectionState, LeaderRecord, ParticipantId, RecordStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coarse phase of a participant, as exposed for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Idle,
    Electing,
    PendingFollow,
    Following,
    Leading,
    Closed,
}

/// Counters kept by one participant over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStats {
    pub elections_started: u64,
    pub elections_won: u64,
    pub heartbeats_sent: u64,
    pub claims_adopted: u64,
    pub fenced_out: u64,
    pub step_downs_observed: u64,
    pub store_failures: u64,
    pub bus_failures: u64,
}

#[derive(Debug, Default)]
struct ElectionAttempt {
    candidates: BTreeSet<ParticipantId>,
    seen_epoch: u64,
}

impl ElectionAttempt {
    fn winner(&self) -> Option<&ParticipantId> {
        self.candidates.iter().next_back()
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Electing(ElectionAttempt),
    PendingFollow,
    Following,
    Leading,
    Closed,
}

pub struct ElectionMachine {
    config: ElectorConfig,
    participant_id: ParticipantId,
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn BroadcastBus>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    phase: Phase,
    epoch: u64,
    is_leader: bool,
    /// Last claim adopted or written by this participant
    known_claim: Option<LeaderRecord>,
    /// Leader that announced its departure; its leftover claim is void
    departed: Option<ParticipantId>,
    timers: TimerSet,
    stats: ElectionStats,
}

impl ElectionMachine {
    pub fn new(
        config: ElectorConfig,
        participant_id: ParticipantId,
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn BroadcastBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rng = match config.randomization_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            participant_id,
            store,
            bus,
            clock,
            rng,
            phase: Phase::Idle,
            epoch: 0,
            is_leader: false,
            known_claim: None,
            departed: None,
            timers: TimerSet::new(),
            stats: ElectionStats::default(),
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn state(&self) -> ElectionState {
        ElectionState {
            is_leader: self.is_leader,
            epoch: self.epoch,
            participant_id: self.participant_id.clone(),
        }
    }

    pub fn role(&self) -> Role {
        match self.phase {
            Phase::Idle => Role::Idle,
            Phase::Electing(_) => Role::Electing,
            Phase::PendingFollow => Role::PendingFollow,
            Phase::Following => Role::Following,
            Phase::Leading => Role::Leading,
            Phase::Closed => Role::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    pub fn stats(&self) -> &ElectionStats {
        &self.stats
    }

    pub fn known_claim(&self) -> Option<&LeaderRecord> {
        self.known_claim.as_ref()
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Join the domain: follow a live claim, resume our own, or elect.
    pub fn start(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            return;
        }

        info!("Participant {} joining election", self.participant_id);
        let now = self.now();
        match self.live_claim(now) {
            Some(record) => self.adopt_claim(record),
            None => self.start_election("no live claim at startup"),
        }
    }

    /// Leave the domain for good. A leader broadcasts its step-down first.
    pub fn stop(&mut self) {
        if self.is_closed() {
            return;
        }

        if matches!(self.phase, Phase::Leading) {
            info!(
                "Participant {} stepping down at epoch {}",
                self.participant_id, self.epoch
            );
            self.publish(ElectionMessage::step_down(self.participant_id.clone()));
        }

        self.timers.cancel_all();
        self.is_leader = false;
        self.phase = Phase::Closed;
        debug!("Participant {} stopped", self.participant_id);
    }

    pub fn handle_message(&mut self, message: ElectionMessage) {
        if matches!(self.phase, Phase::Idle | Phase::Closed) {
            return;
        }

        match message {
            ElectionMessage::Elect {
                candidate_id,
                seen_epoch,
            } => {
                if let Phase::Electing(attempt) = &mut self.phase {
                    debug!(
                        "Observed candidate {} (seen epoch {})",
                        candidate_id, seen_epoch
                    );
                    attempt.seen_epoch = attempt.seen_epoch.max(seen_epoch);
                    attempt.candidates.insert(candidate_id);
                }
            }
            ElectionMessage::Leader { record } | ElectionMessage::Heartbeat { record } => {
                self.observe_claim(record);
            }
            ElectionMessage::StepDown { leader_id } => self.observe_step_down(leader_id),
        }
    }

    /// A write to the record slot by another participant.
    pub fn handle_store_change(&mut self, record: Option<LeaderRecord>) {
        if matches!(self.phase, Phase::Idle | Phase::Closed) {
            return;
        }

        match record {
            Some(record) => self.observe_claim(record),
            None => debug!("Ignoring undecodable or cleared record slot"),
        }
    }

    /// Run every timer whose deadline has passed, earliest first.
    pub fn fire_due_timers(&mut self) {
        let now = self.now();
        while let Some(kind) = self.timers.pop_due(now) {
            match kind {
                TimerKind::ElectionWindow => self.conclude_election(),
                TimerKind::Recheck => self.recheck_claim(),
                TimerKind::Renewal => self.renew_lease(),
                TimerKind::Watchdog => self.lease_expired(),
            }
        }
    }

    fn start_election(&mut self, reason: &str) {
        if matches!(self.phase, Phase::Closed | Phase::Electing(_)) {
            return;
        }

        self.demote(reason);

        let now = self.now();
        let stored = self.read_record();
        if let Some(record) = stored.clone().filter(|r| self.is_live_claim(r, now)) {
            debug!("Live claim {} found, not electing", record);
            self.adopt_claim(record);
            return;
        }

        let stored_epoch = stored.map(|r| r.epoch).unwrap_or(0);
        let seen_epoch = self.epoch.max(stored_epoch);
        let window = self.draw_window();

        let mut candidates = BTreeSet::new();
        candidates.insert(self.participant_id.clone());

        self.timers.cancel(TimerKind::Watchdog);
        self.timers.cancel(TimerKind::Recheck);
        self.phase = Phase::Electing(ElectionAttempt {
            candidates,
            seen_epoch,
        });
        self.timers.schedule(TimerKind::ElectionWindow, now + window);
        self.stats.elections_started += 1;

        info!(
            "Participant {} starting election ({}), seen epoch {}, window {}ms",
            self.participant_id, reason, seen_epoch, window
        );
        self.publish(ElectionMessage::elect(
            self.participant_id.clone(),
            seen_epoch,
        ));
    }

    fn conclude_election(&mut self) {
        let attempt = match &mut self.phase {
            Phase::Electing(attempt) => std::mem::take(attempt),
            _ => return,
        };

        let now = self.now();
        let stored = self.read_record();
        if let Some(record) = stored.clone().filter(|r| self.is_live_claim(r, now)) {
            debug!("Claim {} appeared during the election window", record);
            self.adopt_claim(record);
            return;
        }

        let winner = attempt
            .winner()
            .cloned()
            .unwrap_or_else(|| self.participant_id.clone());

        if winner == self.participant_id {
            let stored_epoch = stored.map(|r| r.epoch).unwrap_or(0);
            let epoch = attempt.seen_epoch.max(stored_epoch) + 1;
            self.stats.elections_won += 1;
            info!(
                "Participant {} won election among {} candidate(s)",
                self.participant_id,
                attempt.candidates.len()
            );
            self.become_leader(epoch);
        } else {
            debug!(
                "Participant {} lost election to {}, awaiting its claim",
                self.participant_id, winner
            );
            self.phase = Phase::PendingFollow;
            self.timers
                .schedule(TimerKind::Recheck, now + self.config.recheck_millis());
        }
    }

    fn become_leader(&mut self, epoch: u64) {
        let now = self.now();
        let record = LeaderRecord::new(
            self.participant_id.clone(),
            epoch,
            now.saturating_add(self.config.lease_millis()),
        );
        if !self.write_record(&record) {
            // Without a stored claim nobody else can see us lead
            self.phase = Phase::PendingFollow;
            self.timers
                .schedule(TimerKind::Recheck, now + self.config.recheck_millis());
            return;
        }

        self.epoch = epoch;
        self.is_leader = true;
        self.phase = Phase::Leading;
        self.known_claim = Some(record.clone());

        self.timers.cancel(TimerKind::ElectionWindow);
        self.timers.cancel(TimerKind::Recheck);
        self.timers.cancel(TimerKind::Watchdog);
        self.timers
            .schedule(TimerKind::Renewal, now + self.config.renew_millis());

        info!("Participant {} is leader at epoch {}", self.participant_id, epoch);
        self.publish(ElectionMessage::leader(record));
    }

    fn renew_lease(&mut self) {
        if !matches!(self.phase, Phase::Leading) {
            return;
        }

        let now = self.now();
        match self.read_record() {
            Some(current) if current.is_held_by(&self.participant_id) => {
                let renewed = current.renewed(now, self.config.lease_millis());
                if !self.write_record(&renewed) {
                    debug!("Renewal not persisted, retrying at next tick");
                }
                self.known_claim = Some(renewed.clone());
                self.stats.heartbeats_sent += 1;
                self.timers
                    .schedule(TimerKind::Renewal, now + self.config.renew_millis());
                debug!("Lease renewed until {}", renewed.lease_expiry);
                self.publish(ElectionMessage::heartbeat(renewed));
            }
            other => {
                warn!(
                    "Participant {} fenced out at epoch {}, slot holds {}",
                    self.participant_id,
                    self.epoch,
                    other
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "nothing".to_string())
                );
                self.stats.fenced_out += 1;
                self.start_election("fenced out");
            }
        }
    }

    fn lease_expired(&mut self) {
        if matches!(self.phase, Phase::Following | Phase::PendingFollow) {
            self.start_election("lease expired");
        }
    }

    fn recheck_claim(&mut self) {
        if !matches!(self.phase, Phase::PendingFollow) {
            return;
        }

        let now = self.now();
        match self.live_claim(now) {
            Some(record) => self.adopt_claim(record),
            None => self.start_election("election winner never claimed"),
        }
    }

    fn observe_claim(&mut self, record: LeaderRecord) {
        let now = self.now();
        if !self.is_live_claim(&record, now) || record.epoch < self.epoch {
            debug!("Ignoring stale claim {}", record);
            return;
        }
        if record.is_held_by(&self.participant_id) {
            return;
        }

        if matches!(self.phase, Phase::Leading) {
            let holds_slot = self
                .read_record()
                .map(|r| r.is_held_by(&self.participant_id))
                .unwrap_or(false);
            if holds_slot {
                debug!("Competing claim {} ignored, slot is ours", record);
                return;
            }
            warn!(
                "Participant {} yielding to concurrent claim {}",
                self.participant_id, record
            );
            self.stats.fenced_out += 1;
        }

        self.follow(record);
    }

    fn observe_step_down(&mut self, leader_id: ParticipantId) {
        if leader_id == self.participant_id {
            return;
        }

        let believed = match self.phase {
            Phase::Following => self.known_claim.as_ref().map(|r| r.leader_id.clone()),
            Phase::PendingFollow => self.read_record().map(|r| r.leader_id),
            _ => None,
        };
        if believed.as_ref() != Some(&leader_id) {
            return;
        }

        info!("Leader {} stepped down", leader_id);
        self.stats.step_downs_observed += 1;
        self.departed = Some(leader_id);
        self.timers.cancel(TimerKind::Watchdog);
        self.start_election("leader stepped down");
    }

    /// Take a live claim found in the store, resuming it if it is ours.
    fn adopt_claim(&mut self, record: LeaderRecord) {
        if record.is_held_by(&self.participant_id) {
            info!(
                "Participant {} resuming its own claim at epoch {}",
                self.participant_id, record.epoch
            );
            let epoch = record.epoch.max(self.epoch);
            self.become_leader(epoch);
        } else {
            self.follow(record);
        }
    }

    fn follow(&mut self, record: LeaderRecord) {
        self.demote("following another claim");

        let watchdog_at = match (&self.phase, &self.known_claim) {
            (Phase::Following, Some(known))
                if known.leader_id == record.leader_id && known.epoch == record.epoch =>
            {
                known.lease_expiry.max(record.lease_expiry)
            }
            _ => record.lease_expiry,
        };

        if !matches!(self.phase, Phase::Following)
            || self.known_claim.as_ref().map(|k| &k.leader_id) != Some(&record.leader_id)
        {
            info!(
                "Participant {} following {} at epoch {}",
                self.participant_id, record.leader_id, record.epoch
            );
            self.stats.claims_adopted += 1;
        }

        self.epoch = self.epoch.max(record.epoch);
        self.timers.cancel(TimerKind::ElectionWindow);
        self.timers.cancel(TimerKind::Recheck);
        self.timers.schedule(TimerKind::Watchdog, watchdog_at);
        self.known_claim = Some(LeaderRecord {
            lease_expiry: watchdog_at,
            ..record
        });
        self.phase = Phase::Following;
    }

    fn demote(&mut self, reason: &str) {
        self.timers.cancel(TimerKind::Renewal);
        if self.is_leader {
            info!(
                "Participant {} no longer leader: {}",
                self.participant_id, reason
            );
            self.is_leader = false;
            if matches!(self.phase, Phase::Leading) {
                self.phase = Phase::Following;
            }
        }
    }

    fn live_claim(&mut self, now: u64) -> Option<LeaderRecord> {
        self.read_record().filter(|r| self.is_live_claim(r, now))
    }

    fn is_live_claim(&self, record: &LeaderRecord, now: u64) -> bool {
        record.is_live_at(now) && self.departed.as_ref() != Some(&record.leader_id)
    }

    fn draw_window(&mut self) -> u64 {
        let (min, max) = self.config.backoff_millis();
        if max <= min {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    fn read_record(&mut self) -> Option<LeaderRecord> {
        match self.store.read(&self.config.record_key) {
            Ok(record) => record,
            Err(e) => {
                warn!("Record read failed, treating slot as empty: {}", e);
                self.stats.store_failures += 1;
                None
            }
        }
    }

    fn write_record(&mut self, record: &LeaderRecord) -> bool {
        match self.store.write(&self.config.record_key, record) {
            Ok(()) => true,
            Err(e) => {
                warn!("Record write of {} failed: {}", record, e);
                self.stats.store_failures += 1;
                false
            }
        }
    }

    fn publish(&mut self, message: ElectionMessage) {
        if let Err(e) = self.bus.publish(&self.config.channel_name, &message) {
            warn!("Failed to broadcast {}: {}", message.kind(), e);
            self.stats.bus_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monarch_bus::{BusEndpoint, InMemoryBus};
    use monarch_core::{ManualClock, MonarchError, MonarchResult, Subscription, SubscriptionId};
    use monarch_store::{SharedRecordStore, StoreConfig};
    use proptest::prelude::*;
    use std::time::Duration;

    const KEY: &str = "monarch:leader";
    const CHANNEL: &str = "monarch_leadership";

    struct Domain {
        store: SharedRecordStore,
        bus: InMemoryBus,
        clock: Arc<ManualClock>,
    }

    struct Peer {
        machine: ElectionMachine,
        inbox: Subscription<ElectionMessage>,
        endpoint: BusEndpoint,
    }

    impl Peer {
        fn pump(&mut self) {
            while let Ok(message) = self.inbox.receiver.try_recv() {
                self.machine.handle_message(message);
            }
        }
    }

    fn config() -> ElectorConfig {
        ElectorConfig::default()
            .with_lease_duration(Duration::from_millis(1000))
            .with_renew_interval(Duration::from_millis(200))
            .with_election_backoff(Duration::from_millis(10), Duration::from_millis(10))
            .with_recheck_delay(Duration::from_millis(50))
    }

    fn domain() -> Domain {
        Domain {
            store: SharedRecordStore::new(StoreConfig::default()),
            bus: InMemoryBus::default(),
            clock: Arc::new(ManualClock::new(10_000)),
        }
    }

    impl Domain {
        fn peer(&self, id: &str) -> Peer {
            let endpoint = self.bus.endpoint();
            let inbox = endpoint.subscribe(CHANNEL).unwrap();
            let machine = ElectionMachine::new(
                config(),
                ParticipantId::from(id),
                Arc::new(self.store.connect()),
                Arc::new(endpoint.clone()),
                self.clock.clone(),
            );
            Peer {
                machine,
                inbox,
                endpoint,
            }
        }

        fn advance(&self, millis: u64) {
            self.clock.advance(Duration::from_millis(millis));
        }

        fn stored(&self) -> Option<LeaderRecord> {
            self.store.connect().read(KEY).unwrap()
        }

        fn overwrite(&self, record: &LeaderRecord) {
            self.store.connect().write(KEY, record).unwrap();
        }

        fn now(&self) -> u64 {
            self.clock.now_millis()
        }
    }

    struct UnreadableStore;

    impl RecordStore for UnreadableStore {
        fn read(&self, _key: &str) -> MonarchResult<Option<LeaderRecord>> {
            Err(MonarchError::store("backend unavailable"))
        }

        fn write(&self, _key: &str, _record: &LeaderRecord) -> MonarchResult<()> {
            Err(MonarchError::store("backend unavailable"))
        }

        fn watch(&self, _key: &str) -> MonarchResult<Subscription<Option<LeaderRecord>>> {
            Err(MonarchError::store("backend unavailable"))
        }

        fn unwatch(&self, _id: SubscriptionId) {}
    }

    #[test]
    fn test_lone_participant_becomes_leader() {
        let domain = domain();
        let mut peer = domain.peer("solo");

        peer.machine.start();
        assert_eq!(peer.machine.role(), Role::Electing);
        assert_eq!(peer.machine.next_deadline(), Some(domain.now() + 10));

        domain.advance(10);
        peer.machine.fire_due_timers();

        let state = peer.machine.state();
        assert!(state.is_leader);
        assert_eq!(state.epoch, 1);

        let record = domain.stored().unwrap();
        assert!(record.is_held_by(&ParticipantId::from("solo")));
        assert_eq!(record.lease_expiry, domain.now() + 1000);
        assert_eq!(
            peer.machine.timers().deadline(TimerKind::Renewal),
            Some(domain.now() + 200)
        );
    }

    #[test]
    fn test_start_follows_live_foreign_claim() {
        let domain = domain();
        let claim = LeaderRecord::new(ParticipantId::from("other"), 4, domain.now() + 500);
        domain.overwrite(&claim);

        let mut peer = domain.peer("me");
        peer.machine.start();

        assert_eq!(peer.machine.role(), Role::Following);
        assert_eq!(peer.machine.state().epoch, 4);
        assert!(!peer.machine.state().is_leader);
        assert_eq!(
            peer.machine.timers().deadline(TimerKind::Watchdog),
            Some(claim.lease_expiry)
        );
    }

    #[test]
    fn test_start_resumes_own_live_claim() {
        let domain = domain();
        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("me"),
            6,
            domain.now() + 300,
        ));

        let mut peer = domain.peer("me");
        peer.machine.start();

        assert_eq!(peer.machine.role(), Role::Leading);
        assert_eq!(peer.machine.state().epoch, 6);
        assert_eq!(domain.stored().unwrap().lease_expiry, domain.now() + 1000);
    }

    #[test]
    fn test_expired_claim_triggers_election_with_higher_epoch() {
        let domain = domain();
        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("gone"),
            9,
            domain.now(),
        ));

        let mut peer = domain.peer("me");
        peer.machine.start();
        assert_eq!(peer.machine.role(), Role::Electing);

        domain.advance(10);
        peer.machine.fire_due_timers();
        assert_eq!(peer.machine.state().epoch, 10);
    }

    #[test]
    fn test_greatest_candidate_wins() {
        let domain = domain();
        let mut low = domain.peer("aaa");
        let mut high = domain.peer("zzz");

        low.machine.start();
        high.machine.start();
        low.pump();
        high.pump();

        domain.advance(10);
        low.machine.fire_due_timers();
        high.machine.fire_due_timers();

        assert!(high.machine.state().is_leader);
        assert!(!low.machine.state().is_leader);
        assert_eq!(low.machine.role(), Role::PendingFollow);

        low.pump();
        assert_eq!(low.machine.role(), Role::Following);
        assert_eq!(low.machine.state().epoch, 1);
    }

    #[test]
    fn test_losing_candidate_elects_when_winner_is_silent() {
        let domain = domain();
        let mut low = domain.peer("aaa");

        low.machine.start();
        low.machine
            .handle_message(ElectionMessage::elect(ParticipantId::from("zzz"), 3));

        domain.advance(10);
        low.machine.fire_due_timers();
        assert_eq!(low.machine.role(), Role::PendingFollow);

        domain.advance(50);
        low.machine.fire_due_timers();
        assert_eq!(low.machine.role(), Role::Electing);

        domain.advance(10);
        low.machine.fire_due_timers();
        assert!(low.machine.state().is_leader);
        assert!(low.machine.state().epoch >= 1);
    }

    #[test]
    fn test_pending_follow_adopts_claim_found_on_recheck() {
        let domain = domain();
        let mut low = domain.peer("aaa");

        low.machine.start();
        low.machine
            .handle_message(ElectionMessage::elect(ParticipantId::from("zzz"), 0));
        domain.advance(10);
        low.machine.fire_due_timers();

        let claim = LeaderRecord::new(ParticipantId::from("zzz"), 1, domain.now() + 1000);
        domain.overwrite(&claim);

        domain.advance(50);
        low.machine.fire_due_timers();
        assert_eq!(low.machine.role(), Role::Following);
        assert_eq!(
            low.machine.timers().deadline(TimerKind::Watchdog),
            Some(claim.lease_expiry)
        );
    }

    #[test]
    fn test_claim_during_window_aborts_election() {
        let domain = domain();
        let mut peer = domain.peer("zzz");
        peer.machine.start();

        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("aaa"),
            2,
            domain.now() + 800,
        ));
        domain.advance(10);
        peer.machine.fire_due_timers();

        assert_eq!(peer.machine.role(), Role::Following);
        assert!(!peer.machine.state().is_leader);
    }

    #[test]
    fn test_watchdog_tracks_heartbeats() {
        let domain = domain();
        let mut leader = domain.peer("zzz");
        let mut follower = domain.peer("aaa");

        leader.machine.start();
        domain.advance(10);
        leader.machine.fire_due_timers();

        follower.machine.start();
        let first = follower.machine.timers().deadline(TimerKind::Watchdog).unwrap();

        domain.advance(200);
        leader.machine.fire_due_timers();
        follower.pump();

        let second = follower.machine.timers().deadline(TimerKind::Watchdog).unwrap();
        assert_eq!(second, first + 200);
        assert_eq!(leader.machine.stats().heartbeats_sent, 1);
    }

    #[test]
    fn test_fenced_leader_steps_aside() {
        let domain = domain();
        let mut peer = domain.peer("me");
        peer.machine.start();
        domain.advance(10);
        peer.machine.fire_due_timers();
        assert!(peer.machine.state().is_leader);

        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("intruder"),
            1,
            domain.now() + 1000,
        ));
        domain.advance(200);
        peer.machine.fire_due_timers();

        assert!(!peer.machine.state().is_leader);
        assert_eq!(peer.machine.role(), Role::Following);
        assert_eq!(peer.machine.stats().fenced_out, 1);
        assert!(domain.stored().unwrap().is_held_by(&ParticipantId::from("intruder")));
    }

    #[test]
    fn test_leader_yields_only_when_slot_is_lost() {
        let domain = domain();
        let mut peer = domain.peer("me");
        peer.machine.start();
        domain.advance(10);
        peer.machine.fire_due_timers();

        let rival = LeaderRecord::new(ParticipantId::from("rival"), 1, domain.now() + 1000);
        peer.machine.handle_message(ElectionMessage::leader(rival.clone()));
        assert!(peer.machine.state().is_leader);

        domain.overwrite(&rival);
        peer.machine.handle_store_change(Some(rival));
        assert!(!peer.machine.state().is_leader);
        assert_eq!(peer.machine.role(), Role::Following);
    }

    #[test]
    fn test_stale_claims_are_ignored() {
        let domain = domain();
        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("current"),
            5,
            domain.now() + 500,
        ));
        let mut peer = domain.peer("me");
        peer.machine.start();
        let watchdog = peer.machine.timers().deadline(TimerKind::Watchdog);

        let older = LeaderRecord::new(ParticipantId::from("old"), 4, domain.now() + 900);
        let expired = LeaderRecord::new(ParticipantId::from("late"), 8, domain.now());
        peer.machine.handle_message(ElectionMessage::heartbeat(older));
        peer.machine.handle_store_change(Some(expired));
        peer.machine.handle_store_change(None);

        assert_eq!(peer.machine.state().epoch, 5);
        assert_eq!(peer.machine.timers().deadline(TimerKind::Watchdog), watchdog);
    }

    #[test]
    fn test_step_down_preempts_lease() {
        let domain = domain();
        let mut leader = domain.peer("zzz");
        let mut follower = domain.peer("aaa");

        leader.machine.start();
        domain.advance(10);
        leader.machine.fire_due_timers();
        follower.machine.start();
        assert_eq!(follower.machine.role(), Role::Following);

        leader.machine.stop();
        follower.pump();
        assert_eq!(follower.machine.role(), Role::Electing);
        assert_eq!(follower.machine.stats().step_downs_observed, 1);

        domain.advance(10);
        follower.machine.fire_due_timers();
        assert!(follower.machine.state().is_leader);
        assert_eq!(follower.machine.state().epoch, 2);
    }

    #[test]
    fn test_step_down_from_unknown_leader_is_ignored() {
        let domain = domain();
        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("current"),
            1,
            domain.now() + 500,
        ));
        let mut peer = domain.peer("me");
        peer.machine.start();

        peer.machine
            .handle_message(ElectionMessage::step_down(ParticipantId::from("someone-else")));
        assert_eq!(peer.machine.role(), Role::Following);
    }

    #[test]
    fn test_stop_is_final_and_idempotent() {
        let domain = domain();
        let mut leader = domain.peer("zzz");
        let mut observer = domain.peer("aaa");

        leader.machine.start();
        domain.advance(10);
        leader.machine.fire_due_timers();
        observer.pump();

        leader.machine.stop();
        leader.machine.stop();
        assert!(leader.machine.is_closed());
        assert!(!leader.machine.state().is_leader);
        assert_eq!(leader.machine.next_deadline(), None);

        let mut step_downs = 0;
        while let Ok(message) = observer.inbox.receiver.try_recv() {
            if matches!(message, ElectionMessage::StepDown { .. }) {
                step_downs += 1;
            }
        }
        assert_eq!(step_downs, 1);

        leader.machine.start();
        leader
            .machine
            .handle_message(ElectionMessage::elect(ParticipantId::from("x"), 0));
        assert_eq!(leader.machine.role(), Role::Closed);
    }

    #[test]
    fn test_unusable_store_never_yields_leadership() {
        let domain = domain();
        let mut machine = ElectionMachine::new(
            config(),
            ParticipantId::from("me"),
            Arc::new(UnreadableStore),
            Arc::new(domain.bus.endpoint()),
            domain.clock.clone(),
        );

        machine.start();
        assert_eq!(machine.role(), Role::Electing);

        domain.advance(10);
        machine.fire_due_timers();
        assert!(!machine.state().is_leader);
        assert_eq!(machine.role(), Role::PendingFollow);

        domain.advance(50);
        machine.fire_due_timers();
        assert!(!machine.state().is_leader);
        assert_eq!(machine.role(), Role::Electing);
        assert!(machine.stats().store_failures >= 4);
    }

    #[test]
    fn test_unreadable_slot_is_treated_as_empty() {
        let domain = domain();
        domain.overwrite(&LeaderRecord::new(
            ParticipantId::from("holder"),
            3,
            domain.now() + 1000,
        ));
        let store = Arc::new(domain.store.connect());
        domain
            .store
            .set_raw(KEY, "{not json", monarch_store::HandleId::external())
            .unwrap();

        let mut machine = ElectionMachine::new(
            config(),
            ParticipantId::from("me"),
            store,
            Arc::new(domain.bus.endpoint()),
            domain.clock.clone(),
        );
        machine.start();
        assert_eq!(machine.role(), Role::Electing);

        domain.advance(10);
        machine.fire_due_timers();
        assert!(machine.state().is_leader);
        assert_eq!(machine.state().epoch, 1);
    }

    #[test]
    fn test_isolated_publisher_still_elects() {
        let domain = domain();
        let mut peer = domain.peer("solo");
        peer.endpoint.set_isolated(true);

        peer.machine.start();
        domain.advance(10);
        peer.machine.fire_due_timers();
        assert!(peer.machine.state().is_leader);
    }

    #[test]
    fn test_seeded_windows_are_reproducible() {
        let domain = domain();
        let seeded = config()
            .with_election_backoff(Duration::from_millis(10), Duration::from_millis(100))
            .with_randomization_seed(42);

        let windows: Vec<u64> = (0..2)
            .map(|_| {
                let mut machine = ElectionMachine::new(
                    seeded.clone(),
                    ParticipantId::from("p"),
                    Arc::new(domain.store.connect()),
                    Arc::new(domain.bus.endpoint()),
                    domain.clock.clone(),
                );
                machine.draw_window()
            })
            .collect();

        assert_eq!(windows[0], windows[1]);
        assert!((10..=100).contains(&windows[0]));
    }

    proptest! {
        #[test]
        fn test_concurrent_start_elects_greatest(ids in proptest::collection::btree_set("[a-z]{1,6}", 1..6)) {
            let domain = domain();
            let mut peers: Vec<Peer> = ids.iter().map(|id| domain.peer(id)).collect();

            for peer in peers.iter_mut() {
                peer.machine.start();
            }
            for peer in peers.iter_mut() {
                peer.pump();
            }

            domain.advance(10);
            for peer in peers.iter_mut() {
                peer.machine.fire_due_timers();
            }
            for peer in peers.iter_mut() {
                peer.pump();
            }

            let leaders: Vec<ParticipantId> = peers
                .iter()
                .filter(|p| p.machine.state().is_leader)
                .map(|p| p.machine.participant_id().clone())
                .collect();
            prop_assert_eq!(leaders.len(), 1);
            prop_assert_eq!(leaders[0].as_str(), ids.iter().next_back().unwrap().as_str());
            prop_assert!(peers.iter().all(|p| p.machine.state().epoch == 1));
        }
    }
}
