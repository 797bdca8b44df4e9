//! Relay - drains one log partition into the persistence handoff queue
//!
//! Delivery contract: an entry is deleted from the log immediately after its
//! decoded event is accepted by the handoff queue, regardless of what the
//! persistence sink later does with it. An entry that fails decode is left in
//! place and re-read on every cycle until someone removes it by hand.

use cometrelay_model::{ConsensusEvent, EventKind};
use cometrelay_store::{EventLog, EventSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Entries pulled per read cycle.
const READ_BATCH: usize = 128;
/// Pause after a failed read before retrying, so a flapping store does not
/// turn the loop hot.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);
/// Pause after a cycle that deleted nothing, which happens when only poison
/// entries remain in the partition.
const STALLED_BACKOFF: Duration = Duration::from_millis(250);

/// Drains one (network, kind) partition.
pub struct Relay {
    log: Arc<EventLog>,
    network: String,
    kind: EventKind,
    token: CancellationToken,
}

impl Relay {
    pub fn new(
        log: Arc<EventLog>,
        network: impl Into<String>,
        kind: EventKind,
        token: CancellationToken,
    ) -> Self {
        Self {
            log,
            network: network.into(),
            kind,
            token,
        }
    }

    /// Run the drain loop until cancellation. `queue` is the bounded handoff
    /// channel; a full queue blocks the loop, which is the backpressure that
    /// keeps the log from outrunning persistence.
    pub async fn run(self, queue: mpsc::Sender<ConsensusEvent>) {
        tracing::info!(network = %self.network, kind = %self.kind, "relay started");
        loop {
            let batch = tokio::select! {
                _ = self.token.cancelled() => break,
                result = self.log.read_oldest(&self.network, self.kind, READ_BATCH) => {
                    match result {
                        Ok(batch) => batch,
                        Err(e) => {
                            tracing::error!(
                                network = %self.network,
                                kind = %self.kind,
                                error = %e,
                                "failed to read partition"
                            );
                            if self.pause(READ_ERROR_BACKOFF).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            let mut deleted = 0usize;
            for entry in &batch {
                match ConsensusEvent::decode(self.kind, entry.id.height, &entry.fields) {
                    Ok(event) => {
                        if queue.send(event).await.is_err() {
                            // Consumer is gone; entry stays in the log and is
                            // picked up on the next start.
                            tracing::warn!(
                                network = %self.network,
                                kind = %self.kind,
                                "handoff queue closed, relay stopping"
                            );
                            return;
                        }
                        // Handed off; the entry's lifecycle ends here even if
                        // the sink later fails.
                        match self.log.delete(&self.network, self.kind, entry.id) {
                            Ok(()) => deleted += 1,
                            Err(e) => {
                                tracing::error!(
                                    network = %self.network,
                                    kind = %self.kind,
                                    id = %entry.id,
                                    error = %e,
                                    "failed to delete relayed entry; it will be redelivered"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        // Poison entry: keep it, keep going. Siblings are not
                        // blocked; this one is retried on every future cycle.
                        tracing::error!(
                            network = %self.network,
                            kind = %self.kind,
                            id = %entry.id,
                            error = %e,
                            "failed to decode entry, leaving it in the partition"
                        );
                    }
                }
            }

            if !batch.is_empty() && deleted == 0 {
                // Every entry read this cycle is poison; the next read would
                // return the same batch immediately.
                if self.pause(STALLED_BACKOFF).await {
                    break;
                }
            }
        }
        tracing::info!(network = %self.network, kind = %self.kind, "relay stopped");
    }

    /// Sleep unless cancelled first; true means shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Consumer side of the handoff queue: forwards decoded events to the
/// persistence sink. A sink failure is logged and the event dropped; its log
/// entry is already gone.
pub async fn run_sink_consumer(
    network: String,
    kind: EventKind,
    mut queue: mpsc::Receiver<ConsensusEvent>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = queue.recv() => match received {
                Some(event) => event,
                None => break,
            }
        };
        if let Err(e) = sink.store_event(&network, &event).await {
            tracing::error!(
                network = %network,
                kind = %kind,
                error = %e,
                "failed to persist event, dropping"
            );
        }
    }
}
