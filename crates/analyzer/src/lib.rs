//! Periodic analysis jobs layered on the pipeline's output
//!
//! Two simple batch jobs: the validator indexer keeps each network's known
//! validator set current, and the missing-vote analyzer flags validators that
//! have stopped voting. Both are pure consumers of the archive's query
//! surface and never touch the event log.

pub mod indexer;
pub mod missing_votes;

pub use indexer::ValidatorIndexer;
pub use missing_votes::MissingVoteAnalyzer;
