//! # Core Types
//!
//! Fundamental types shared by every participant in a coordination domain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of one participant.
///
/// Identities are generated once per participant lifetime and never change.
/// They are compared as plain strings: the election tie-break picks the
/// lexicographically greatest identity among the candidates it observed.
///
/// # Examples
///
/// ```rust
/// use monarch_core::ParticipantId;
///
/// let a = ParticipantId::from("aaa");
/// let z = ParticipantId::from("zzz");
/// assert!(z > a);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The empty identity carried by detached (no-op) electors.
    pub fn detached() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The leadership claim persisted in the shared record store.
///
/// A record is live while `lease_expiry` lies in the future. Stale records
/// are never removed; they are superseded by the next winner's write.
///
/// # Examples
///
/// ```rust
/// use monarch_core::{LeaderRecord, ParticipantId};
///
/// let record = LeaderRecord::new(ParticipantId::from("p-1"), 3, 1_000);
/// assert!(record.is_live_at(999));
/// assert!(!record.is_live_at(1_000));
///
/// let renewed = record.renewed(900, 500);
/// assert_eq!(renewed.epoch, 3);
/// assert_eq!(renewed.lease_expiry, 1_400);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderRecord {
    pub leader_id: ParticipantId,
    pub epoch: u64,
    /// Absolute expiry, in milliseconds on the domain clock.
    pub lease_expiry: u64,
}

impl LeaderRecord {
    pub fn new(leader_id: ParticipantId, epoch: u64, lease_expiry: u64) -> Self {
        Self {
            leader_id,
            epoch,
            lease_expiry,
        }
    }

    /// Returns `true` if the lease has not expired at `now`.
    pub fn is_live_at(&self, now: u64) -> bool {
        self.lease_expiry > now
    }

    /// Same claim with a fresh lease starting at `now`.
    pub fn renewed(&self, now: u64, lease_millis: u64) -> Self {
        Self {
            leader_id: self.leader_id.clone(),
            epoch: self.epoch,
            lease_expiry: now.saturating_add(lease_millis),
        }
    }

    pub fn is_held_by(&self, participant: &ParticipantId) -> bool {
        self.leader_id == *participant
    }
}

impl fmt::Display for LeaderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (lease until {})",
            self.leader_id, self.epoch, self.lease_expiry
        )
    }
}

/// Externally visible state of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionState {
    pub is_leader: bool,
    pub epoch: u64,
    pub participant_id: ParticipantId,
}

impl ElectionState {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            is_leader: false,
            epoch: 0,
            participant_id,
        }
    }

    /// The static non-leader state reported where no election can run.
    pub fn detached() -> Self {
        Self::new(ParticipantId::detached())
    }
}
