//! Log entries and their identifiers
//!
//! An entry is one durably recorded event inside a (network, kind) partition.
//! Its ID combines the block height with a per-height sequence number handed
//! out by the sequencer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field map of an encoded entry. All values are byte-strings; integer and
/// timestamp fields hold their decimal / formatted text representation.
pub type EntryFields = BTreeMap<String, Vec<u8>>;

/// Identifier of one entry within a partition: `"<height>-<sequence>"`.
///
/// Sequence numbers start at 1 per (network, kind, height) key. The binary
/// key form is big-endian (height, seq) so that byte order in the backing
/// store equals numeric order, which plain string IDs would not give
/// (`"100-10"` sorts before `"100-2"` lexicographically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId {
    pub height: u64,
    pub seq: u64,
}

impl EntryId {
    pub fn new(height: u64, seq: u64) -> Self {
        Self { height, seq }
    }

    /// Binary key used for ordered storage.
    pub fn to_key(self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.height.to_be_bytes());
        key[8..].copy_from_slice(&self.seq.to_be_bytes());
        key
    }

    /// Parse an ID back out of its binary key form.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 16 {
            return None;
        }
        let height = u64::from_be_bytes(key[..8].try_into().ok()?);
        let seq = u64::from_be_bytes(key[8..].try_into().ok()?);
        Some(Self { height, seq })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (height, seq) = s.split_once('-').ok_or(ParseEntryIdError)?;
        Ok(Self {
            height: height.parse().map_err(|_| ParseEntryIdError)?,
            seq: seq.parse().map_err(|_| ParseEntryIdError)?,
        })
    }
}

/// Error returned when an entry ID string is not `"<height>-<sequence>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("entry id must be of the form \"<height>-<sequence>\"")]
pub struct ParseEntryIdError;

/// One durably recorded event, as read back from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub fields: EntryFields,
}

impl Entry {
    pub fn new(id: EntryId, fields: EntryFields) -> Self {
        Self { id, fields }
    }
}
