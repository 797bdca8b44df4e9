//! Live consensus event subscriptions
//!
//! A connector talks to its node through the [`NodeFeed`] trait: three
//! independent event streams plus the on-demand validator-set query. The
//! production implementation is [`WsFeed`], a JSON-RPC-over-WebSocket client.

pub mod parse;
pub mod ws;

use async_trait::async_trait;
use cometrelay_model::{ConsensusEvent, EventKind, ValidatorInfo};
use tokio::sync::mpsc;

pub use ws::{FeedError, WsFeed};

/// A single network's live subscription interface.
#[async_trait]
pub trait NodeFeed: Send + Sync {
    /// Open one of the three event streams. Establishment failure is fatal
    /// to connector startup; a closed receiver afterwards means the upstream
    /// subscription ended.
    async fn subscribe(&self, kind: EventKind) -> anyhow::Result<mpsc::Receiver<ConsensusEvent>>;

    /// Fetch the network's current validator set.
    async fn validators(&self) -> anyhow::Result<Vec<ValidatorInfo>>;
}
