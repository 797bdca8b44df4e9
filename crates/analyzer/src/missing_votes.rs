//! Missing-vote analyzer - flags validators that have stopped voting

use cometrelay_store::EventSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically diffs each network's known validator set against the
/// validators seen in recent votes and warn-logs every address with no vote
/// on record. Alerting is the log line; there is no other output channel.
pub struct MissingVoteAnalyzer {
    networks: Vec<String>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
}

impl MissingVoteAnalyzer {
    pub fn new(
        networks: Vec<String>,
        sink: Arc<dyn EventSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            networks,
            sink,
            token,
        }
    }

    pub async fn run(self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    for network in &self.networks {
                        if let Err(e) = self.check_network(network).await {
                            tracing::error!(network, error = %e, "missing-vote check failed");
                        }
                    }
                }
            }
        }
        tracing::info!("missing-vote analyzer stopped");
    }

    /// One check pass; returns the addresses that had no recorded vote.
    pub async fn check_network(&self, network: &str) -> anyhow::Result<Vec<String>> {
        let validators = self.sink.validators(network).await?;
        let voted = self.sink.latest_vote_heights(network).await?;

        let mut missing = Vec::new();
        for address in validators {
            if !voted.contains_key(&address) {
                tracing::warn!(network, validator = %address, "missing vote");
                missing.push(address);
            }
        }
        tracing::info!(
            network,
            voted = voted.len(),
            missing = missing.len(),
            "checked votes"
        );
        Ok(missing)
    }
}
