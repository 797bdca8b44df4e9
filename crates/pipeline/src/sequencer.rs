//! Sequencer - ordered, durable admission of live events

use cometrelay_model::{ConsensusEvent, EntryId};
use cometrelay_store::{EventLog, StoreError};
use std::sync::Arc;

/// Assigns each event an ordered position in its (network, kind, height)
/// partition and durably records it. The ordering guarantee lives in the
/// log's atomic increment-and-append; this handle adds the field encoding.
#[derive(Clone)]
pub struct Sequencer {
    log: Arc<EventLog>,
}

impl Sequencer {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }

    /// Append one event. Not idempotent: identical events produce distinct
    /// entries. On error the event is simply not recorded; the caller logs
    /// and drops it, there is no retry at this layer.
    pub fn append(&self, network: &str, event: &ConsensusEvent) -> Result<EntryId, StoreError> {
        self.log.append(
            network,
            event.kind(),
            event.height(),
            &event.encode_fields(),
        )
    }
}
