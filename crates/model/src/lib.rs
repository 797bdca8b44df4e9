//! Core types for consensus event relaying
//!
//! Defines the three event shapes emitted by validator nodes (votes, new
//! rounds, round-step transitions), the log-entry encoding they travel in,
//! and the strict decoder that turns stored entries back into typed events.

pub mod codec;
pub mod entry;
pub mod event;

pub use codec::{decode_timestamp, encode_timestamp, DecodeError};
pub use entry::{Entry, EntryFields, EntryId};
pub use event::{
    ConsensusEvent, EventKind, NewRoundEvent, RoundStepEvent, ValidatorInfo, VoteEvent, VoteKind,
};
