//! Orchestrator - owns every connector and relay and their joint lifecycle

use crate::connector::Connector;
use crate::relay::{run_sink_consumer, Relay};
use crate::sequencer::Sequencer;
use anyhow::Context;
use cometrelay_model::EventKind;
use cometrelay_store::{EventLog, EventSink};
use cometrelay_subscriber::WsFeed;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Supervises the full set of connectors and relays for all configured
/// networks. Every spawned task lives in one `JoinSet`, which is the join
/// barrier `shutdown` drains after firing the shared cancellation token.
pub struct Orchestrator {
    log: Arc<EventLog>,
    sequencer: Sequencer,
    connectors: Mutex<Vec<Arc<Connector>>>,
    token: CancellationToken,
    tasks: JoinSet<()>,
}

impl Orchestrator {
    /// Build from pre-constructed connectors (used by tests and by callers
    /// that bring their own feed implementation).
    pub fn new(log: Arc<EventLog>, connectors: Vec<Arc<Connector>>) -> Self {
        Self {
            sequencer: Sequencer::new(log.clone()),
            log,
            connectors: Mutex::new(connectors),
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Build one WebSocket-fed connector per (network name → endpoint) entry.
    pub async fn connect(
        log: Arc<EventLog>,
        endpoints: HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut connectors = Vec::with_capacity(endpoints.len());
        for (network, url) in endpoints {
            let feed = WsFeed::connect(&url)
                .await
                .with_context(|| format!("failed to connect feed for network {network}"))?;
            connectors.push(Arc::new(Connector::new(network, Arc::new(feed))));
        }
        Ok(Self::new(log, connectors))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors.lock().clone()
    }

    /// Start every connector, then one persistent forwarding task per
    /// (network, kind) that moves connector output into the sequencer. The
    /// registry lock is held only during this setup phase.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        let connectors = self.connectors.lock().clone();
        for connector in connectors {
            connector
                .start(&mut self.tasks, &self.token)
                .await
                .with_context(|| format!("failed to start connector {}", connector.network()))?;

            for kind in EventKind::ALL {
                let mut output = connector
                    .take_output(kind)
                    .context("connector output already taken")?;
                let sequencer = self.sequencer.clone();
                let network = connector.network().to_string();
                let token = self.token.clone();
                self.tasks.spawn(async move {
                    loop {
                        let event = tokio::select! {
                            _ = token.cancelled() => break,
                            received = output.recv() => match received {
                                Some(event) => event,
                                None => break,
                            }
                        };
                        if let Err(e) = sequencer.append(&network, &event) {
                            // Recorded nowhere: the event is dropped here by
                            // contract, retry is a higher-level concern.
                            tracing::error!(
                                network = %network,
                                kind = %kind,
                                error = %e,
                                "failed to sequence event, dropping"
                            );
                        }
                    }
                });
            }
        }
        Ok(())
    }

    /// Start one relay plus one handoff-queue consumer per (network, kind).
    pub fn spawn_relays(&mut self, sink: Arc<dyn EventSink>) {
        let connectors = self.connectors.lock().clone();
        for connector in connectors {
            for kind in EventKind::ALL {
                let network = connector.network().to_string();
                let (tx, rx) = mpsc::channel(kind.queue_capacity());

                let relay = Relay::new(
                    self.log.clone(),
                    network.clone(),
                    kind,
                    self.token.clone(),
                );
                self.tasks.spawn(relay.run(tx));
                self.tasks.spawn(run_sink_consumer(
                    network,
                    kind,
                    rx,
                    sink.clone(),
                    self.token.clone(),
                ));
            }
        }
    }

    /// Fire the shared cancellation token and block until every spawned task
    /// has observed it and returned. Events sitting in bounded queues at this
    /// point are lost; their log entries, if not yet deleted, survive for the
    /// next run.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "pipeline task panicked");
                }
            }
        }
        tracing::info!("orchestrator shut down");
    }
}
