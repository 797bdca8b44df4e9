//! Typed consensus events
//!
//! The three shapes emitted by a validator node's consensus state machine.
//! `ConsensusEvent` is the tagged union carried through the pipeline so the
//! persistence consumer dispatches on the variant instead of downcasting.

use crate::codec::{self, DecodeError};
use crate::entry::EntryFields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of vote a validator cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Prevote,
    Precommit,
    /// Anything the upstream feed labels with a type we do not recognize.
    Other,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Prevote => "prevote",
            VoteKind::Precommit => "precommit",
            VoteKind::Other => "other",
        }
    }

    /// Unknown labels map to `Other` rather than failing decode.
    pub fn parse(s: &str) -> Self {
        match s {
            "prevote" => VoteKind::Prevote,
            "precommit" => VoteKind::Precommit,
            _ => VoteKind::Other,
        }
    }
}

/// A vote cast by a validator for a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub kind: VoteKind,
    pub height: u64,
    pub round: i64,
    pub block_id: String,
    pub timestamp: DateTime<Utc>,
    pub validator_address: String,
    pub validator_index: i64,
    pub signature: Vec<u8>,
}

/// Announcement of a new consensus round at a height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoundEvent {
    pub height: u64,
    pub round: i64,
    pub step: String,
    pub proposer_address: String,
    pub proposer_index: i64,
}

/// A round-step transition within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStepEvent {
    pub height: u64,
    pub round: i64,
    pub step: String,
}

/// The three partition kinds a network produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Vote,
    NewRound,
    RoundStep,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Vote, EventKind::NewRound, EventKind::RoundStep];

    /// Stream name suffix of this kind's log partition.
    pub fn stream_suffix(self) -> &'static str {
        match self {
            EventKind::Vote => "votes",
            EventKind::NewRound => "new_round",
            EventKind::RoundStep => "new_round_step",
        }
    }

    /// Capacity of the handoff queue between relay and persistence consumer.
    /// Votes arrive far more often than round transitions.
    pub fn queue_capacity(self) -> usize {
        match self {
            EventKind::Vote => 1024,
            EventKind::NewRound | EventKind::RoundStep => 256,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stream_suffix())
    }
}

/// A validator known to a network, as reported by the validator-set query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: String,
    pub voting_power: i64,
}

/// Tagged union of every event shape the pipeline carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusEvent {
    Vote(VoteEvent),
    NewRound(NewRoundEvent),
    RoundStep(RoundStepEvent),
}

impl ConsensusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConsensusEvent::Vote(_) => EventKind::Vote,
            ConsensusEvent::NewRound(_) => EventKind::NewRound,
            ConsensusEvent::RoundStep(_) => EventKind::RoundStep,
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            ConsensusEvent::Vote(v) => v.height,
            ConsensusEvent::NewRound(r) => r.height,
            ConsensusEvent::RoundStep(s) => s.height,
        }
    }

    /// Encode into the log's field map. The height is not part of the map;
    /// it travels in the entry ID.
    pub fn encode_fields(&self) -> EntryFields {
        let mut fields = EntryFields::new();
        match self {
            ConsensusEvent::Vote(v) => {
                fields.insert("type".into(), v.kind.as_str().into());
                fields.insert("round".into(), v.round.to_string().into_bytes());
                fields.insert("block_hash".into(), v.block_id.clone().into_bytes());
                fields.insert(
                    "timestamp".into(),
                    codec::encode_timestamp(&v.timestamp).into_bytes(),
                );
                fields.insert("validator".into(), v.validator_address.clone().into_bytes());
                fields.insert("index".into(), v.validator_index.to_string().into_bytes());
                fields.insert("signature".into(), v.signature.clone());
            }
            ConsensusEvent::NewRound(r) => {
                fields.insert("round".into(), r.round.to_string().into_bytes());
                fields.insert("step".into(), r.step.clone().into_bytes());
                fields.insert("proposer".into(), r.proposer_address.clone().into_bytes());
                fields.insert(
                    "proposer_index".into(),
                    r.proposer_index.to_string().into_bytes(),
                );
            }
            ConsensusEvent::RoundStep(s) => {
                fields.insert("round".into(), s.round.to_string().into_bytes());
                fields.insert("step".into(), s.step.clone().into_bytes());
            }
        }
        fields
    }

    /// Strict schema decode of a stored field map back into a typed event.
    ///
    /// Every required field must be present and well shaped; one bad field
    /// fails the whole entry.
    pub fn decode(kind: EventKind, height: u64, fields: &EntryFields) -> Result<Self, DecodeError> {
        match kind {
            EventKind::Vote => Ok(ConsensusEvent::Vote(VoteEvent {
                kind: VoteKind::parse(&codec::str_field(fields, "type")?),
                height,
                round: codec::int_field(fields, "round")?,
                block_id: codec::str_field(fields, "block_hash")?,
                timestamp: codec::decode_timestamp(&codec::str_field(fields, "timestamp")?)?,
                validator_address: codec::str_field(fields, "validator")?,
                validator_index: codec::int_field(fields, "index")?,
                signature: codec::bytes_field(fields, "signature")?,
            })),
            EventKind::NewRound => Ok(ConsensusEvent::NewRound(NewRoundEvent {
                height,
                round: codec::int_field(fields, "round")?,
                step: codec::str_field(fields, "step")?,
                proposer_address: codec::str_field(fields, "proposer")?,
                proposer_index: codec::int_field(fields, "proposer_index")?,
            })),
            EventKind::RoundStep => Ok(ConsensusEvent::RoundStep(RoundStepEvent {
                height,
                round: codec::int_field(fields, "round")?,
                step: codec::str_field(fields, "step")?,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_vote() -> VoteEvent {
        VoteEvent {
            kind: VoteKind::Precommit,
            height: 100,
            round: 2,
            block_id: "AABB:1:CCDD".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 33, 44).unwrap(),
            validator_address: "cosmosvaloper1xyz".to_string(),
            validator_index: 7,
            signature: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn vote_round_trips_field_for_field() {
        let event = ConsensusEvent::Vote(sample_vote());
        let fields = event.encode_fields();
        let decoded = ConsensusEvent::decode(EventKind::Vote, 100, &fields).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn new_round_round_trips() {
        let event = ConsensusEvent::NewRound(NewRoundEvent {
            height: 55,
            round: 0,
            step: "RoundStepNewRound".to_string(),
            proposer_address: "cosmosvaloper1abc".to_string(),
            proposer_index: 3,
        });
        let fields = event.encode_fields();
        let decoded = ConsensusEvent::decode(EventKind::NewRound, 55, &fields).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn round_step_round_trips() {
        let event = ConsensusEvent::RoundStep(RoundStepEvent {
            height: 55,
            round: 1,
            step: "RoundStepPrevote".to_string(),
        });
        let fields = event.encode_fields();
        let decoded = ConsensusEvent::decode(EventKind::RoundStep, 55, &fields).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn missing_field_fails_decode() {
        let mut fields = ConsensusEvent::Vote(sample_vote()).encode_fields();
        fields.remove("type");
        let err = ConsensusEvent::decode(EventKind::Vote, 100, &fields).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("type"));
    }

    #[test]
    fn malformed_int_fails_decode() {
        let mut fields = ConsensusEvent::Vote(sample_vote()).encode_fields();
        fields.insert("round".into(), b"not-a-number".to_vec());
        let err = ConsensusEvent::decode(EventKind::Vote, 100, &fields).unwrap_err();
        assert_eq!(err, DecodeError::BadInt("round"));
    }

    #[test]
    fn unknown_vote_type_maps_to_other() {
        let mut fields = ConsensusEvent::Vote(sample_vote()).encode_fields();
        fields.insert("type".into(), b"SIGNED_MSG_TYPE_PROPOSAL".to_vec());
        let decoded = ConsensusEvent::decode(EventKind::Vote, 100, &fields).unwrap();
        match decoded {
            ConsensusEvent::Vote(v) => assert_eq!(v.kind, VoteKind::Other),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn signature_bytes_survive_non_utf8() {
        let mut vote = sample_vote();
        vote.signature = vec![0xff, 0xfe, 0x00, 0x01];
        let event = ConsensusEvent::Vote(vote.clone());
        let decoded =
            ConsensusEvent::decode(EventKind::Vote, 100, &event.encode_fields()).unwrap();
        match decoded {
            ConsensusEvent::Vote(v) => assert_eq!(v.signature, vote.signature),
            other => panic!("unexpected variant {other:?}"),
        }
    }
}
