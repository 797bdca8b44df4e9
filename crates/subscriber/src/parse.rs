//! JSON payload parsing for node event pushes
//!
//! Converts the node's JSON event envelopes into typed [`ConsensusEvent`]s.
//! Heights arrive as strings, signatures as base64, timestamps as RFC 3339.

use crate::ws::FeedError;
use base64::Engine;
use chrono::{DateTime, Utc};
use cometrelay_model::{
    ConsensusEvent, NewRoundEvent, RoundStepEvent, ValidatorInfo, VoteEvent, VoteKind,
};
use serde_json::Value;

const EVENT_TYPE_VOTE: &str = "tendermint/event/Vote";
const EVENT_TYPE_NEW_ROUND: &str = "tendermint/event/NewRound";
const EVENT_TYPE_ROUND_STATE: &str = "tendermint/event/RoundState";

/// Parse a subscription push's `data` object into a typed event.
pub fn event_from_json(data: &Value) -> Result<ConsensusEvent, FeedError> {
    let event_type = str_at(data, "/type")?;
    match event_type.as_str() {
        EVENT_TYPE_VOTE => vote_from_json(
            data.pointer("/value/Vote")
                .ok_or_else(|| missing("/value/Vote"))?,
        ),
        EVENT_TYPE_NEW_ROUND => new_round_from_json(
            data.pointer("/value").ok_or_else(|| missing("/value"))?,
        ),
        EVENT_TYPE_ROUND_STATE => round_step_from_json(
            data.pointer("/value").ok_or_else(|| missing("/value"))?,
        ),
        other => Err(FeedError::Payload(format!("unknown event type `{other}`"))),
    }
}

fn vote_from_json(value: &Value) -> Result<ConsensusEvent, FeedError> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(str_at(value, "/signature")?)
        .map_err(|e| FeedError::Payload(format!("signature is not base64: {e}")))?;

    Ok(ConsensusEvent::Vote(VoteEvent {
        kind: vote_kind(value.pointer("/type")),
        height: u64_at(value, "/height")?,
        round: i64_at(value, "/round")?,
        block_id: block_id_string(value.pointer("/block_id")),
        timestamp: timestamp_at(value, "/timestamp")?,
        validator_address: str_at(value, "/validator_address")?,
        validator_index: i64_at(value, "/validator_index")?,
        signature,
    }))
}

fn new_round_from_json(value: &Value) -> Result<ConsensusEvent, FeedError> {
    Ok(ConsensusEvent::NewRound(NewRoundEvent {
        height: u64_at(value, "/height")?,
        round: i64_at(value, "/round")?,
        step: str_at(value, "/step")?,
        proposer_address: str_at(value, "/proposer/address")?,
        proposer_index: i64_at(value, "/proposer/index")?,
    }))
}

fn round_step_from_json(value: &Value) -> Result<ConsensusEvent, FeedError> {
    Ok(ConsensusEvent::RoundStep(RoundStepEvent {
        height: u64_at(value, "/height")?,
        round: i64_at(value, "/round")?,
        step: str_at(value, "/step")?,
    }))
}

/// Parse one page of a `validators` RPC response.
pub fn validators_from_json(result: &Value) -> Result<Vec<ValidatorInfo>, FeedError> {
    let list = result
        .pointer("/validators")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("/validators"))?;
    list.iter()
        .map(|v| {
            Ok(ValidatorInfo {
                address: str_at(v, "/address")?,
                voting_power: i64_at(v, "/voting_power")?,
            })
        })
        .collect()
}

/// The node encodes vote kinds as the numeric signed-message type; some
/// gateways re-encode them as strings. Anything unrecognized is `Other`.
fn vote_kind(value: Option<&Value>) -> VoteKind {
    match value {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(1) => VoteKind::Prevote,
            Some(2) => VoteKind::Precommit,
            _ => VoteKind::Other,
        },
        Some(Value::String(s)) => match s.as_str() {
            "SIGNED_MSG_TYPE_PREVOTE" | "prevote" => VoteKind::Prevote,
            "SIGNED_MSG_TYPE_PRECOMMIT" | "precommit" => VoteKind::Precommit,
            _ => VoteKind::Other,
        },
        _ => VoteKind::Other,
    }
}

/// Render a block ID as `hash:part_total:part_hash`, the node's own display
/// form. Kept as an opaque string through the whole pipeline.
fn block_id_string(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let hash = value.pointer("/hash").and_then(Value::as_str).unwrap_or("");
    // Field name differs between node versions.
    let parts = value
        .pointer("/parts")
        .or_else(|| value.pointer("/part_set_header"));
    let total = parts
        .and_then(|p| p.pointer("/total"))
        .map(flexible_u64)
        .unwrap_or(0);
    let part_hash = parts
        .and_then(|p| p.pointer("/hash"))
        .and_then(Value::as_str)
        .unwrap_or("");
    format!("{hash}:{total}:{part_hash}")
}

fn missing(path: &str) -> FeedError {
    FeedError::Payload(format!("missing field at `{path}`"))
}

fn str_at(value: &Value, path: &str) -> Result<String, FeedError> {
    value
        .pointer(path)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(path))
}

fn flexible_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Integers arrive as JSON numbers or as decimal strings depending on the
/// field; accept both.
fn u64_at(value: &Value, path: &str) -> Result<u64, FeedError> {
    let v = value.pointer(path).ok_or_else(|| missing(path))?;
    match v {
        Value::Number(n) => n.as_u64().ok_or_else(|| bad_int(path)),
        Value::String(s) => s.parse().map_err(|_| bad_int(path)),
        _ => Err(bad_int(path)),
    }
}

fn i64_at(value: &Value, path: &str) -> Result<i64, FeedError> {
    let v = value.pointer(path).ok_or_else(|| missing(path))?;
    match v {
        Value::Number(n) => n.as_i64().ok_or_else(|| bad_int(path)),
        Value::String(s) => s.parse().map_err(|_| bad_int(path)),
        _ => Err(bad_int(path)),
    }
}

fn bad_int(path: &str) -> FeedError {
    FeedError::Payload(format!("field at `{path}` is not an integer"))
}

fn timestamp_at(value: &Value, path: &str) -> Result<DateTime<Utc>, FeedError> {
    let raw = str_at(value, path)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedError::Payload(format!("bad timestamp `{raw}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_vote_push() {
        let data = json!({
            "type": "tendermint/event/Vote",
            "value": {
                "Vote": {
                    "type": 2,
                    "height": "100",
                    "round": 0,
                    "block_id": {
                        "hash": "AABBCC",
                        "parts": { "total": 1, "hash": "DDEEFF" }
                    },
                    "timestamp": "2024-05-01T12:33:44.123456789Z",
                    "validator_address": "95ACE3A7B87A3E4B",
                    "validator_index": 7,
                    "signature": "3q2+7w=="
                }
            }
        });
        let event = event_from_json(&data).unwrap();
        match event {
            ConsensusEvent::Vote(v) => {
                assert_eq!(v.kind, VoteKind::Precommit);
                assert_eq!(v.height, 100);
                assert_eq!(v.block_id, "AABBCC:1:DDEEFF");
                assert_eq!(v.validator_address, "95ACE3A7B87A3E4B");
                assert_eq!(v.signature, vec![0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn parses_new_round_push() {
        let data = json!({
            "type": "tendermint/event/NewRound",
            "value": {
                "height": "55",
                "round": 0,
                "step": "RoundStepNewRound",
                "proposer": { "address": "95ACE3A7B87A3E4B", "index": 3 }
            }
        });
        let event = event_from_json(&data).unwrap();
        match event {
            ConsensusEvent::NewRound(r) => {
                assert_eq!(r.height, 55);
                assert_eq!(r.proposer_index, 3);
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn parses_round_state_push() {
        let data = json!({
            "type": "tendermint/event/RoundState",
            "value": { "height": "55", "round": 1, "step": "RoundStepPrevote" }
        });
        let event = event_from_json(&data).unwrap();
        match event {
            ConsensusEvent::RoundStep(s) => assert_eq!(s.step, "RoundStepPrevote"),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let data = json!({ "type": "tendermint/event/NewBlock", "value": {} });
        assert!(event_from_json(&data).is_err());
    }

    #[test]
    fn rejects_vote_without_timestamp() {
        let data = json!({
            "type": "tendermint/event/Vote",
            "value": {
                "Vote": {
                    "type": 1,
                    "height": "1",
                    "round": 0,
                    "validator_address": "A",
                    "validator_index": 0,
                    "signature": ""
                }
            }
        });
        assert!(event_from_json(&data).is_err());
    }

    #[test]
    fn parses_validator_page() {
        let result = json!({
            "block_height": "100",
            "validators": [
                { "address": "A", "voting_power": "10" },
                { "address": "B", "voting_power": 20 }
            ],
            "total": "2"
        });
        let validators = validators_from_json(&result).unwrap();
        assert_eq!(validators.len(), 2);
        assert_eq!(validators[0].address, "A");
        assert_eq!(validators[0].voting_power, 10);
        assert_eq!(validators[1].voting_power, 20);
    }
}
