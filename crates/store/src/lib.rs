//! Durable storage for the relay pipeline
//!
//! Two stores backed by sled: the intermediate event log that the sequencer
//! appends to and the relay drains, and the archive that decoded events are
//! persisted into. Both survive process restarts.

pub mod archive;
pub mod log;

pub use archive::{ArchiveStore, EventSink};
pub use log::{EventLog, StoreError};
