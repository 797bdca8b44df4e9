//! Durable event log
//!
//! One sled tree per (network, event-kind) partition, keyed by the binary
//! form of the entry ID so iteration order equals arrival order, plus a
//! shared counters tree holding the per-(network, kind, height) sequence
//! counters. Append runs the counter increment and the entry insert inside
//! one multi-tree transaction, which is what makes concurrent appends on the
//! same key hand out unique, gapless sequence numbers.

use cometrelay_model::{Entry, EntryFields, EntryId, EventKind};
use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by the event log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("failed to encode entry: {0}")]
    Encode(String),
}

/// Append-only event log with explicit removal.
///
/// Entries exist from the moment [`EventLog::append`] returns until a relay
/// deletes them; deletion is the only way an entry disappears. Sequence
/// counters persist beyond process lifetime and are never reset.
pub struct EventLog {
    db: sled::Db,
    counters: sled::Tree,
    partitions: RwLock<HashMap<String, sled::Tree>>,
}

impl EventLog {
    /// Open (or create) the log at the given path. Failure here is fatal to
    /// pipeline construction; nothing can sequence events without the log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(&path)?;
        let counters = db.open_tree("counters")?;
        tracing::info!("opened event log at {:?}", path.as_ref());
        Ok(Self {
            db,
            counters,
            partitions: RwLock::new(HashMap::new()),
        })
    }

    fn partition_tree(&self, network: &str, kind: EventKind) -> Result<sled::Tree, StoreError> {
        let name = partition_name(network, kind);
        if let Some(tree) = self.partitions.read().get(&name) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(name.as_bytes())?;
        self.partitions.write().insert(name, tree.clone());
        Ok(tree)
    }

    /// Atomically assign the next sequence number for (network, kind, height)
    /// and append the entry under ID `height-sequence`.
    ///
    /// Not idempotent: two appends with identical fields produce two distinct
    /// entries. Duplicate suppression is a downstream concern.
    pub fn append(
        &self,
        network: &str,
        kind: EventKind,
        height: u64,
        fields: &EntryFields,
    ) -> Result<EntryId, StoreError> {
        let partition = self.partition_tree(network, kind)?;
        let counter_key = counter_key(network, kind, height);

        (&self.counters, &partition)
            .transaction(|(counters, partition)| {
                let seq = match counters.get(&counter_key)? {
                    Some(raw) => decode_counter(&raw) + 1,
                    None => 1,
                };
                counters.insert(counter_key.clone(), seq.to_be_bytes().to_vec())?;

                let id = EntryId::new(height, seq);
                let entry = Entry::new(id, fields.clone());
                let encoded = bincode::serialize(&entry).map_err(|e| {
                    ConflictableTransactionError::Abort(StoreError::Encode(e.to_string()))
                })?;
                partition.insert(id.to_key().to_vec(), encoded)?;
                Ok(id)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Sled(e),
            })
    }

    /// Read up to `max` entries from the oldest remaining position of a
    /// partition, in ID order. Blocks while the partition is empty; there is
    /// no read cursor, so entries the relay never deletes are returned again
    /// on every call.
    pub async fn read_oldest(
        &self,
        network: &str,
        kind: EventKind,
        max: usize,
    ) -> Result<Vec<Entry>, StoreError> {
        let partition = self.partition_tree(network, kind)?;
        loop {
            // Subscribe before scanning so an append between the scan and the
            // wait cannot be missed.
            let mut subscriber = partition.watch_prefix(vec![]);

            let mut batch = Vec::with_capacity(max.min(64));
            for item in partition.iter() {
                let (key, value) = item?;
                match bincode::deserialize::<Entry>(&value) {
                    Ok(entry) => batch.push(entry),
                    Err(e) => {
                        // Unreadable at the storage layer; leave it in place
                        // like any other poison entry but keep its siblings
                        // flowing.
                        tracing::warn!(
                            partition = %partition_name(network, kind),
                            key = ?key,
                            error = %e,
                            "skipping undeserializable entry"
                        );
                    }
                }
                if batch.len() >= max {
                    break;
                }
            }
            if !batch.is_empty() {
                return Ok(batch);
            }

            if (&mut subscriber).await.is_none() {
                // Store shut down underneath us; report an empty read and let
                // the caller decide via its cancellation token.
                return Ok(Vec::new());
            }
        }
    }

    /// Remove one entry. A deleted entry is never returned by a later read.
    pub fn delete(&self, network: &str, kind: EventKind, id: EntryId) -> Result<(), StoreError> {
        let partition = self.partition_tree(network, kind)?;
        partition.remove(&id.to_key())?;
        Ok(())
    }

    /// Number of entries currently sitting in a partition.
    pub fn partition_len(&self, network: &str, kind: EventKind) -> Result<usize, StoreError> {
        Ok(self.partition_tree(network, kind)?.len())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

fn partition_name(network: &str, kind: EventKind) -> String {
    format!("{}:{}", network, kind.stream_suffix())
}

fn counter_key(network: &str, kind: EventKind, height: u64) -> Vec<u8> {
    format!("{}:seq:{}:{}", network, kind.stream_suffix(), height).into_bytes()
}

fn decode_counter(raw: &[u8]) -> u64 {
    let bytes: [u8; 8] = raw.try_into().unwrap_or([0u8; 8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn fields(tag: &str) -> EntryFields {
        let mut f = EntryFields::new();
        f.insert("round".into(), b"0".to_vec());
        f.insert("step".into(), tag.as_bytes().to_vec());
        f.insert("proposer".into(), b"val".to_vec());
        f.insert("proposer_index".into(), b"1".to_vec());
        f
    }

    #[test]
    fn sequences_start_at_one_and_increase() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        let a = log
            .append("testnet", EventKind::NewRound, 100, &fields("a"))
            .unwrap();
        let b = log
            .append("testnet", EventKind::NewRound, 100, &fields("b"))
            .unwrap();
        assert_eq!(a.to_string(), "100-1");
        assert_eq!(b.to_string(), "100-2");
    }

    #[test]
    fn heights_are_isolated() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        log.append("testnet", EventKind::NewRound, 100, &fields("a"))
            .unwrap();
        let at_101 = log
            .append("testnet", EventKind::NewRound, 101, &fields("b"))
            .unwrap();
        let again_100 = log
            .append("testnet", EventKind::NewRound, 100, &fields("c"))
            .unwrap();
        assert_eq!(at_101, EntryId::new(101, 1));
        assert_eq!(again_100, EntryId::new(100, 2));
    }

    #[test]
    fn networks_do_not_interfere() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        let a = log
            .append("network-a", EventKind::Vote, 50, &fields("a"))
            .unwrap();
        let b = log
            .append("network-b", EventKind::Vote, 50, &fields("b"))
            .unwrap();
        assert_eq!(a, EntryId::new(50, 1));
        assert_eq!(b, EntryId::new(50, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_unique_gapless_sequences() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let log = log.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                log.append("testnet", EventKind::Vote, 7, &fields(&i.to_string()))
                    .unwrap()
            }));
        }
        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap().seq);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=32).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn read_returns_entries_in_id_order() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        // Enough entries at one height that lexicographic string ordering
        // would scramble them.
        for i in 0..12 {
            log.append("testnet", EventKind::Vote, 100, &fields(&i.to_string()))
                .unwrap();
        }
        let entries = log.read_oldest("testnet", EventKind::Vote, 64).await.unwrap();
        let ids: Vec<String> = entries.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids[0], "100-1");
        assert_eq!(ids[9], "100-10");
        assert_eq!(ids[11], "100-12");
    }

    #[tokio::test]
    async fn deleted_entries_never_reappear() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();

        let id = log
            .append("testnet", EventKind::Vote, 100, &fields("x"))
            .unwrap();
        log.append("testnet", EventKind::Vote, 100, &fields("y"))
            .unwrap();
        log.delete("testnet", EventKind::Vote, id).unwrap();

        let entries = log.read_oldest("testnet", EventKind::Vote, 64).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId::new(100, 2));
    }

    #[tokio::test]
    async fn read_blocks_until_an_append_arrives() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::open(dir.path()).unwrap());

        let reader = {
            let log = log.clone();
            tokio::spawn(async move { log.read_oldest("testnet", EventKind::Vote, 8).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        log.append("testnet", EventKind::Vote, 1, &fields("late"))
            .unwrap();
        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId::new(1, 1));
    }

    #[test]
    fn counters_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = EventLog::open(dir.path()).unwrap();
            log.append("testnet", EventKind::Vote, 9, &fields("a"))
                .unwrap();
            log.flush().unwrap();
        }
        let log = EventLog::open(dir.path()).unwrap();
        let id = log
            .append("testnet", EventKind::Vote, 9, &fields("b"))
            .unwrap();
        assert_eq!(id, EntryId::new(9, 2));
    }
}
