//! Connector - bridges one network's live subscription into the pipeline

use cometrelay_model::{ConsensusEvent, EventKind, ValidatorInfo};
use cometrelay_subscriber::NodeFeed;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Owns one network's feed. `start` opens the three subscriptions and pumps
/// each into its own bounded output channel; the orchestrator takes the
/// outputs and wires them to the sequencer.
pub struct Connector {
    network: String,
    feed: Arc<dyn NodeFeed>,
    outputs: Mutex<HashMap<EventKind, mpsc::Receiver<ConsensusEvent>>>,
}

impl Connector {
    pub fn new(network: impl Into<String>, feed: Arc<dyn NodeFeed>) -> Self {
        Self {
            network: network.into(),
            feed,
            outputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Establish the three subscriptions and spawn one forwarding pump per
    /// kind. A subscription that cannot be established fails startup.
    pub async fn start(
        &self,
        tasks: &mut JoinSet<()>,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        for kind in EventKind::ALL {
            let mut upstream = self.feed.subscribe(kind).await?;
            let (tx, rx) = mpsc::channel(kind.queue_capacity());
            self.outputs.lock().insert(kind, rx);

            let network = self.network.clone();
            let token = token.clone();
            tasks.spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = token.cancelled() => break,
                        received = upstream.recv() => match received {
                            Some(event) => event,
                            None => {
                                tracing::warn!(network = %network, kind = %kind, "subscription stream ended");
                                break;
                            }
                        }
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }
        tracing::info!(network = %self.network, "connector started");
        Ok(())
    }

    /// Take ownership of one kind's output channel. Each may be taken once,
    /// after `start`.
    pub fn take_output(&self, kind: EventKind) -> Option<mpsc::Receiver<ConsensusEvent>> {
        self.outputs.lock().remove(&kind)
    }

    /// Fetch the network's current validator set through the feed.
    pub async fn validators(&self) -> anyhow::Result<Vec<ValidatorInfo>> {
        self.feed.validators().await
    }
}
