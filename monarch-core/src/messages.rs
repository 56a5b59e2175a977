//! # Wire Messages
//!
//! Payloads exchanged on the broadcast bus. The encoding is a tagged union
//! (`{"type": "...", "payload": {...}}`) so that any transport carrying JSON
//! text can relay it unchanged.

use crate::{LeaderRecord, MonarchError, MonarchResult, ParticipantId};
use serde::{Deserialize, Serialize};

/// Messages published on the leadership channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionMessage {
    /// Candidacy announcement opening (or joining) an election.
    #[serde(rename_all = "camelCase")]
    Elect {
        candidate_id: ParticipantId,
        seen_epoch: u64,
    },

    /// A freshly claimed leadership record.
    Leader { record: LeaderRecord },

    /// A renewed leadership record.
    Heartbeat { record: LeaderRecord },

    /// The named leader is relinquishing its claim.
    #[serde(rename_all = "camelCase")]
    StepDown { leader_id: ParticipantId },
}

impl ElectionMessage {
    pub fn elect(candidate_id: ParticipantId, seen_epoch: u64) -> Self {
        Self::Elect {
            candidate_id,
            seen_epoch,
        }
    }

    pub fn leader(record: LeaderRecord) -> Self {
        Self::Leader { record }
    }

    pub fn heartbeat(record: LeaderRecord) -> Self {
        Self::Heartbeat { record }
    }

    pub fn step_down(leader_id: ParticipantId) -> Self {
        Self::StepDown { leader_id }
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Elect { .. } => "ELECT",
            Self::Leader { .. } => "LEADER",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::StepDown { .. } => "STEP_DOWN",
        }
    }

    /// The leadership record carried by `LEADER` and `HEARTBEAT`.
    pub fn record(&self) -> Option<&LeaderRecord> {
        match self {
            Self::Leader { record } | Self::Heartbeat { record } => Some(record),
            _ => None,
        }
    }

    pub fn to_json(&self) -> MonarchResult<String> {
        serde_json::to_string(self).map_err(MonarchError::from)
    }

    pub fn from_json(payload: &str) -> MonarchResult<Self> {
        serde_json::from_str(payload).map_err(MonarchError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_elect_wire_format() {
        let message = ElectionMessage::elect(ParticipantId::from("zzz"), 4);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value,
            json!({ "type": "ELECT", "payload": { "candidateId": "zzz", "seenEpoch": 4 } })
        );
    }

    #[test]
    fn test_step_down_wire_format() {
        let message = ElectionMessage::step_down(ParticipantId::from("p-9"));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value,
            json!({ "type": "STEP_DOWN", "payload": { "leaderId": "p-9" } })
        );
    }

    #[test]
    fn test_heartbeat_decodes_from_foreign_payload() {
        let raw = r#"{"type":"HEARTBEAT","payload":{"record":{"leaderId":"tab-1","epoch":3,"leaseExpiry":9000}}}"#;
        let message = ElectionMessage::from_json(raw).unwrap();

        assert_eq!(message.kind(), "HEARTBEAT");
        let record = message.record().unwrap();
        assert_eq!(record.leader_id.as_str(), "tab-1");
        assert_eq!(record.epoch, 3);
        assert_eq!(record.lease_expiry, 9000);
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let raw = r#"{"type":"VOTE","payload":{}}"#;
        let err = ElectionMessage::from_json(raw).unwrap_err();
        assert!(matches!(err, MonarchError::Serialization(_)));
    }

    #[test]
    fn test_record_accessor_only_for_claims() {
        let elect = ElectionMessage::elect(ParticipantId::from("a"), 0);
        assert!(elect.record().is_none());

        let leader = ElectionMessage::leader(LeaderRecord::new(ParticipantId::from("a"), 1, 10));
        assert!(leader.record().is_some());
    }
}
