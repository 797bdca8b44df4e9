//! Event sequencing and relay pipeline
//!
//! Architecture:
//! - One Connector per monitored network bridges the live subscription into
//!   per-kind bounded channels
//! - The Sequencer appends each event to its (network, kind, height) ordered
//!   log partition with an atomically assigned sequence number
//! - One Relay per (network, kind) partition drains the log, decodes entries,
//!   hands them to a bounded queue, and deletes them on successful handoff
//! - The Orchestrator owns all of the above and joins every task on shutdown

pub mod connector;
pub mod orchestrator;
pub mod relay;
pub mod sequencer;

pub use connector::Connector;
pub use orchestrator::Orchestrator;
pub use relay::Relay;
pub use sequencer::Sequencer;
