//! JSON-RPC ledger client
//!
//! One WebSocket connection per run. A receiver task routes responses to
//! pending requests by id and status notifications to watchers by
//! subscription id.
//!
//! ```text
//!   submit_order ──► system_accountNextIndex ──► sign ──► author_submitAndWatchExtrinsic
//!                                                              │
//!                                       subscription id ◄──────┘
//!                                              │
//!   receiver task ── author_extrinsicUpdate ──► WatchStream ──► confirmation
//! ```
//!
//! Dropping a [`WatchStream`] detaches it: the subscription is forgotten,
//! late notifications for it are discarded, and `author_unwatchExtrinsic`
//! is sent to the node.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::signer::OrderSigner;
use super::transport::{self, WsSink, WsStream};
use super::types::{parse_status, StatusEvent, StorageOrder};
use super::{Ledger, StatusStream};
use crate::config::LedgerConfig;
use crate::error::{MigrateError, Result};

const NOTIFICATION_METHOD: &str = "author_extrinsicUpdate";

type PendingSender = oneshot::Sender<Result<Value>>;

/// Routing state shared with the receiver task.
#[derive(Default)]
struct Router {
    pending: HashMap<u64, PendingSender>,
    watchers: HashMap<String, mpsc::UnboundedSender<StatusEvent>>,
    /// Notifications that arrived before their watcher was registered,
    /// with the arrival time of the first one
    early: HashMap<String, (Instant, Vec<StatusEvent>)>,
    /// Dropped subscriptions whose unwatch is not yet acknowledged
    detached: HashSet<String>,
    /// Unwatch request id to subscription
    unwatching: HashMap<u64, String>,
    closed: bool,
}

impl Router {
    /// Take the buffered events for `subscription` and forget any other
    /// buffer older than `max_age`; those belong to no live watcher.
    fn take_early(&mut self, subscription: &str, max_age: Duration) -> Vec<StatusEvent> {
        let events = self
            .early
            .remove(subscription)
            .map(|(_, events)| events)
            .unwrap_or_default();
        self.early.retain(|stale, (since, _)| {
            let keep = since.elapsed() <= max_age;
            if !keep {
                debug!(subscription = %stale, "Discarding unclaimed status updates");
            }
            keep
        });
        events
    }
}

/// Ledger node reached over WebSocket JSON-RPC.
pub struct RpcLedger {
    endpoint: String,
    signer: OrderSigner,
    sink: Arc<Mutex<WsSink>>,
    router: Arc<Mutex<Router>>,
    next_id: Arc<AtomicU64>,
    request_timeout: Duration,
    detach_tx: mpsc::UnboundedSender<String>,
    recv_task: JoinHandle<()>,
    detach_task: JoinHandle<()>,
}

impl RpcLedger {
    /// Connect and confirm the node answers. Any failure here is a
    /// `LedgerConnect` error, which aborts the run before any item.
    pub async fn connect(endpoint: &str, signer: OrderSigner, config: &LedgerConfig) -> Result<Self> {
        info!(endpoint = %endpoint, account = %signer.account(), "Connecting to ledger");

        let (sink, stream) = transport::connect(endpoint, config.request_timeout()).await?;
        let sink = Arc::new(Mutex::new(sink));
        let router = Arc::new(Mutex::new(Router::default()));
        let next_id = Arc::new(AtomicU64::new(1));

        let recv_task = tokio::spawn(receiver_loop(stream, Arc::clone(&router)));

        let (detach_tx, detach_rx) = mpsc::unbounded_channel();
        let detach_task = tokio::spawn(detach_loop(
            detach_rx,
            Arc::clone(&sink),
            Arc::clone(&router),
            Arc::clone(&next_id),
        ));

        let ledger = Self {
            endpoint: endpoint.to_string(),
            signer,
            sink,
            router,
            next_id,
            request_timeout: config.request_timeout(),
            detach_tx,
            recv_task,
            detach_task,
        };

        let chain = ledger
            .call("system_chain", json!([]))
            .await
            .map_err(|e| MigrateError::LedgerConnect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        info!(endpoint = %endpoint, chain = %chain, "Ledger connected");

        Ok(ledger)
    }

    /// Make one JSON-RPC request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut router = self.router.lock().await;
            if router.closed {
                return Err(MigrateError::Ledger("connection closed".into()));
            }
            router.pending.insert(id, response_tx);
        }

        debug!(id = id, method = %method, "RPC request");
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let sent = {
            let mut sink = self.sink.lock().await;
            transport::send_text(&mut sink, request.to_string()).await
        };
        if let Err(e) = sent {
            self.router.lock().await.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MigrateError::Ledger("response channel closed".into())),
            Err(_) => {
                self.router.lock().await.pending.remove(&id);
                Err(MigrateError::Timeout(format!("{} after {:?}", method, self.request_timeout)))
            }
        }
    }

    async fn next_nonce(&self) -> Result<u64> {
        let value = self
            .call("system_accountNextIndex", json!([self.signer.account()]))
            .await?;
        value
            .as_u64()
            .ok_or_else(|| MigrateError::Ledger(format!("unexpected nonce value {}", value)))
    }

    async fn watch(&self, subscription: String) -> WatchStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = self.router.lock().await;
        for event in router.take_early(&subscription, self.request_timeout) {
            let _ = tx.send(event);
        }
        if router.closed {
            let _ = tx.send(StatusEvent::Error("ledger connection closed".into()));
        } else {
            router.watchers.insert(subscription.clone(), tx);
        }
        WatchStream {
            rx,
            subscription,
            detach_tx: self.detach_tx.clone(),
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn submit_order(&self, order: &StorageOrder) -> Result<StatusStream> {
        let nonce = self.next_nonce().await?;
        let signed = self.signer.sign(order, nonce)?;

        debug!(cid = %order.cid, size = order.size, nonce = nonce, "Submitting storage order");
        let subscription = self
            .call("author_submitAndWatchExtrinsic", json!([signed]))
            .await?;
        let subscription = subscription_key(&subscription)
            .ok_or_else(|| MigrateError::Ledger(format!("bad subscription id {}", subscription)))?;

        Ok(self.watch(subscription).await.boxed())
    }

    async fn disconnect(&self) {
        use futures_util::SinkExt;

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Error closing ledger connection");
        }
        self.detach_task.abort();
        info!(endpoint = %self.endpoint, "Ledger disconnected");
    }
}

impl Drop for RpcLedger {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.detach_task.abort();
    }
}

/// Status updates for one submitted order.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
    subscription: String,
    detach_tx: mpsc::UnboundedSender<String>,
}

impl Stream for WatchStream {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StatusEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        let _ = self.detach_tx.send(self.subscription.clone());
    }
}

fn subscription_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Route incoming frames until the connection ends, then fail everything
/// still waiting.
async fn receiver_loop(mut stream: WsStream, router: Arc<Mutex<Router>>) {
    debug!("Ledger receiver loop started");

    loop {
        let text = match transport::recv_text(&mut stream).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!("Ledger closed connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "Ledger connection failed");
                break;
            }
        };

        let message: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed ledger message");
                continue;
            }
        };

        route(&message, &router).await;
    }

    let mut router = router.lock().await;
    router.closed = true;
    for (id, tx) in router.pending.drain() {
        debug!(id = id, "Failing pending request");
        let _ = tx.send(Err(MigrateError::Ledger("connection closed".into())));
    }
    for (subscription, tx) in router.watchers.drain() {
        debug!(subscription = %subscription, "Failing watcher");
        let _ = tx.send(StatusEvent::Error("ledger connection closed".into()));
    }
    debug!("Ledger receiver loop ended");
}

async fn route(message: &Value, router: &Arc<Mutex<Router>>) {
    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let result = match message.get("error") {
            Some(err) => Err(MigrateError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let mut router = router.lock().await;
        if let Some(tx) = router.pending.remove(&id) {
            let _ = tx.send(result);
        } else if let Some(subscription) = router.unwatching.remove(&id) {
            debug!(subscription = %subscription, "Unwatch acknowledged");
            router.detached.remove(&subscription);
        }
        return;
    }

    if message.get("method").and_then(Value::as_str) != Some(NOTIFICATION_METHOD) {
        debug!(message = %message, "Ignoring unsolicited ledger message");
        return;
    }

    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let Some(subscription) = params.get("subscription").and_then(subscription_key) else {
        warn!("Status notification without subscription id");
        return;
    };
    let Some(event) = params.get("result").and_then(parse_status) else {
        return;
    };

    let mut router = router.lock().await;
    if router.detached.contains(&subscription) {
        return;
    }
    if let Some(tx) = router.watchers.get(&subscription) {
        if tx.send(event).is_err() {
            router.watchers.remove(&subscription);
        }
        return;
    }
    router
        .early
        .entry(subscription)
        .or_insert_with(|| (Instant::now(), Vec::new()))
        .1
        .push(event);
}

/// Forget detached subscriptions and tell the node to stop sending.
async fn detach_loop(
    mut detach_rx: mpsc::UnboundedReceiver<String>,
    sink: Arc<Mutex<WsSink>>,
    router: Arc<Mutex<Router>>,
    next_id: Arc<AtomicU64>,
) {
    while let Some(subscription) = detach_rx.recv().await {
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut router = router.lock().await;
            router.watchers.remove(&subscription);
            router.early.remove(&subscription);
            if router.closed {
                continue;
            }
            router.detached.insert(subscription.clone());
            router.unwatching.insert(id, subscription.clone());
        }

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "author_unwatchExtrinsic",
            "params": [subscription],
        });
        let mut sink = sink.lock().await;
        if let Err(e) = transport::send_text(&mut sink, request.to_string()).await {
            debug!(error = %e, "Failed to unwatch subscription");
        }
    }
}
