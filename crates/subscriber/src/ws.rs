//! WebSocket JSON-RPC feed client
//!
//! One socket per network. A writer task owns the sink half; a driver task
//! owns the stream half and routes incoming frames: subscription pushes go to
//! the per-kind bounded channels (keyed by query string), request responses
//! go to the oneshot waiter registered under their JSON-RPC id.

use crate::{parse, NodeFeed};
use async_trait::async_trait;
use cometrelay_model::{ConsensusEvent, EventKind, ValidatorInfo};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

/// Validators are fetched in pages of this size.
const VALIDATORS_PER_PAGE: usize = 100;
/// Hard cap on pages per call, bounding a validator set to 400 entries.
/// No monitored network is known to exceed that; documented limitation.
const MAX_VALIDATOR_PAGES: usize = 4;

/// Errors from the feed transport.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("feed connection closed")]
    Closed,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, FeedError>>>>>;
type SubscriptionMap = Arc<Mutex<HashMap<String, mpsc::Sender<ConsensusEvent>>>>;

/// JSON-RPC-over-WebSocket implementation of [`NodeFeed`].
pub struct WsFeed {
    endpoint: String,
    req_tx: mpsc::Sender<Message>,
    pending: PendingMap,
    subscriptions: SubscriptionMap,
    next_id: AtomicU64,
    driver: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsFeed {
    /// Connect to a node's WebSocket endpoint and start the driver tasks.
    pub async fn connect(endpoint: &str) -> Result<Self, FeedError> {
        let (ws_stream, _) = connect_async(endpoint).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        tracing::info!(endpoint, "connected to node feed");

        let (req_tx, mut req_rx) = mpsc::channel::<Message>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(msg) = req_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let driver_pending = pending.clone();
        let driver_subs = subscriptions.clone();
        let driver_endpoint = endpoint.to_string();
        let driver_req_tx = req_tx.clone();
        let driver = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        route_frame(&text, &driver_pending, &driver_subs).await;
                    }
                    // The writer owns the sink half, so pongs go through it.
                    Ok(Message::Ping(payload)) => {
                        if driver_req_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::warn!(endpoint = %driver_endpoint, "node closed feed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(endpoint = %driver_endpoint, error = %e, "feed socket error");
                        break;
                    }
                    _ => {}
                }
            }
            // Fail any in-flight requests; closed subscription channels are
            // observed by their consumers as stream end.
            driver_pending.lock().clear();
            driver_subs.lock().clear();
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            req_tx,
            pending,
            subscriptions,
            next_id: AtomicU64::new(1),
            driver,
            writer,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, FeedError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self
            .req_tx
            .send(Message::Text(frame.to_string()))
            .await
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(FeedError::Closed);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Closed),
        }
    }
}

#[async_trait]
impl NodeFeed for WsFeed {
    async fn subscribe(&self, kind: EventKind) -> anyhow::Result<mpsc::Receiver<ConsensusEvent>> {
        let query = subscription_query(kind);
        let (tx, rx) = mpsc::channel(kind.queue_capacity());
        self.subscriptions.lock().insert(query.to_string(), tx);

        if let Err(e) = self.request("subscribe", json!({ "query": query })).await {
            self.subscriptions.lock().remove(query);
            return Err(anyhow::Error::from(e)
                .context(format!("failed to subscribe to {kind} on {}", self.endpoint)));
        }
        Ok(rx)
    }

    async fn validators(&self) -> anyhow::Result<Vec<ValidatorInfo>> {
        let validators = fetch_validator_pages(|page| {
            let params = json!({
                "page": page.to_string(),
                "per_page": VALIDATORS_PER_PAGE.to_string(),
            });
            self.request("validators", params)
        })
        .await?;
        Ok(validators)
    }
}

/// Page through a `validators` query until the set is exhausted or the page
/// cap is hit.
async fn fetch_validator_pages<F, Fut>(fetch_page: F) -> Result<Vec<ValidatorInfo>, FeedError>
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = Result<Value, FeedError>>,
{
    let mut validators = Vec::with_capacity(VALIDATORS_PER_PAGE);
    for page in 1..=MAX_VALIDATOR_PAGES {
        match fetch_page(page).await {
            Ok(result) => validators.extend(parse::validators_from_json(&result)?),
            // The node reports an out-of-range page once the set is fully
            // enumerated.
            Err(FeedError::Rpc(message)) if message.contains("page should be within") => break,
            Err(e) => return Err(e),
        }
    }
    Ok(validators)
}

impl Drop for WsFeed {
    fn drop(&mut self) {
        self.driver.abort();
        self.writer.abort();
    }
}

fn subscription_query(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Vote => "tm.event='Vote'",
        EventKind::NewRound => "tm.event='NewRound'",
        EventKind::RoundStep => "tm.event='NewRoundStep'",
    }
}

async fn route_frame(text: &str, pending: &PendingMap, subscriptions: &SubscriptionMap) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "discarding unparseable feed frame");
            return;
        }
    };

    // Subscription pushes carry the originating query plus an event payload.
    if let (Some(query), Some(data)) = (
        value.pointer("/result/query").and_then(Value::as_str),
        value.pointer("/result/data"),
    ) {
        match parse::event_from_json(data) {
            Ok(event) => {
                let sender = subscriptions.lock().get(query).cloned();
                if let Some(sender) = sender {
                    // A full channel backpressures the socket read loop.
                    let _ = sender.send(event).await;
                }
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "discarding malformed event push");
            }
        }
        return;
    }

    // Everything else is a response to a pending request.
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        return;
    };
    let Some(waiter) = pending.lock().remove(&id) else {
        return;
    };
    let result = match value.get("error") {
        Some(err) => {
            let message = err.pointer("/message").and_then(Value::as_str).unwrap_or("");
            let detail = err.pointer("/data").and_then(Value::as_str).unwrap_or("");
            Err(FeedError::Rpc(format!("{message} {detail}").trim().to_string()))
        }
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = waiter.send(result);
}
