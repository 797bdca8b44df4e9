//! Archive store - long-term persistence for decoded events
//!
//! The relay hands decoded events to an [`EventSink`]; this module provides
//! the sled-backed implementation used by the daemon, plus the small query
//! surface the periodic analysis jobs need (known validator sets and the
//! latest vote seen per validator).

use async_trait::async_trait;
use cometrelay_model::{ConsensusEvent, EventKind, ValidatorInfo};
use std::collections::HashMap;
use std::path::Path;

/// Where decoded events end up. One event at a time, no transactional
/// grouping; a failure is reported to the caller, which logs and drops the
/// event (the backing log entry is already gone by then).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn store_event(&self, network: &str, event: &ConsensusEvent) -> anyhow::Result<()>;

    /// Upsert the known validator set of a network.
    async fn store_validators(
        &self,
        network: &str,
        validators: &[ValidatorInfo],
    ) -> anyhow::Result<()>;

    /// Addresses of every validator ever recorded for a network.
    async fn validators(&self, network: &str) -> anyhow::Result<Vec<String>>;

    /// Highest vote height seen per validator address.
    async fn latest_vote_heights(&self, network: &str) -> anyhow::Result<HashMap<String, u64>>;
}

/// Sled-backed archive. Events are keyed by a database-wide monotonic ID so
/// insertion order is preserved per tree.
pub struct ArchiveStore {
    db: sled::Db,
}

impl ArchiveStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        tracing::info!("opened archive store at {:?}", path.as_ref());
        Ok(Self { db })
    }

    fn event_tree(&self, network: &str, kind: EventKind) -> anyhow::Result<sled::Tree> {
        Ok(self
            .db
            .open_tree(format!("events:{}:{}", network, kind.stream_suffix()))?)
    }

    fn validator_tree(&self, network: &str) -> anyhow::Result<sled::Tree> {
        Ok(self.db.open_tree(format!("validators:{network}"))?)
    }

    fn latest_vote_tree(&self, network: &str) -> anyhow::Result<sled::Tree> {
        Ok(self.db.open_tree(format!("latest_votes:{network}"))?)
    }

    /// All archived events of one kind, oldest first. Used by tests and the
    /// analyzer; not part of the hot path.
    pub fn events(&self, network: &str, kind: EventKind) -> anyhow::Result<Vec<ConsensusEvent>> {
        let mut events = Vec::new();
        for item in self.event_tree(network, kind)?.iter() {
            let (_, value) = item?;
            events.push(bincode::deserialize(&value)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSink for ArchiveStore {
    async fn store_event(&self, network: &str, event: &ConsensusEvent) -> anyhow::Result<()> {
        let tree = self.event_tree(network, event.kind())?;
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes().to_vec(), bincode::serialize(event)?)?;

        if let ConsensusEvent::Vote(vote) = event {
            let latest = self.latest_vote_tree(network)?;
            let address = vote.validator_address.as_bytes();
            let height = vote.height;
            latest.fetch_and_update(address, |current| {
                let known = current
                    .map(|raw| {
                        let bytes: [u8; 8] = raw.try_into().unwrap_or([0u8; 8]);
                        u64::from_be_bytes(bytes)
                    })
                    .unwrap_or(0);
                Some(height.max(known).to_be_bytes().to_vec())
            })?;
        }
        Ok(())
    }

    async fn store_validators(
        &self,
        network: &str,
        validators: &[ValidatorInfo],
    ) -> anyhow::Result<()> {
        let tree = self.validator_tree(network)?;
        for validator in validators {
            tree.insert(
                validator.address.as_bytes(),
                bincode::serialize(validator)?,
            )?;
        }
        Ok(())
    }

    async fn validators(&self, network: &str) -> anyhow::Result<Vec<String>> {
        let mut addresses = Vec::new();
        for item in self.validator_tree(network)?.iter() {
            let (key, _) = item?;
            addresses.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(addresses)
    }

    async fn latest_vote_heights(&self, network: &str) -> anyhow::Result<HashMap<String, u64>> {
        let mut heights = HashMap::new();
        for item in self.latest_vote_tree(network)?.iter() {
            let (key, value) = item?;
            let bytes: [u8; 8] = value.as_ref().try_into().unwrap_or([0u8; 8]);
            heights.insert(
                String::from_utf8_lossy(&key).into_owned(),
                u64::from_be_bytes(bytes),
            );
        }
        Ok(heights)
    }
}
