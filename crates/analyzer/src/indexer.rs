//! Validator indexer - periodically snapshots each network's validator set

use cometrelay_pipeline::Connector;
use cometrelay_store::EventSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Polls every connector's validator-set query on a fixed interval and
/// upserts the result into the sink.
pub struct ValidatorIndexer {
    connectors: Vec<Arc<Connector>>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
}

impl ValidatorIndexer {
    pub fn new(
        connectors: Vec<Arc<Connector>>,
        sink: Arc<dyn EventSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            connectors,
            sink,
            token,
        }
    }

    /// Poll until cancelled. Fetch or store failures affect only the network
    /// they occurred on and only the current cycle.
    pub async fn run(self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => self.index_once().await,
            }
        }
        tracing::info!("validator indexer stopped");
    }

    /// One indexing pass over every network.
    pub async fn index_once(&self) {
        for connector in &self.connectors {
            let network = connector.network();
            let validators = match connector.validators().await {
                Ok(validators) => validators,
                Err(e) => {
                    tracing::error!(network, error = %e, "failed to fetch validators");
                    continue;
                }
            };
            if let Err(e) = self.sink.store_validators(network, &validators).await {
                tracing::error!(network, error = %e, "failed to store validators");
                continue;
            }
            tracing::debug!(network, count = validators.len(), "indexed validator set");
        }
    }
}
