//! RpcLedger against a scripted WebSocket node
//!
//! The node speaks just enough JSON-RPC to accept one connection, answer
//! `system_chain` / `system_accountNextIndex`, and push status updates for
//! a submitted order.

use elohim_migrate::config::LedgerConfig;
use elohim_migrate::ledger::SignedOrder;
use elohim_migrate::{
    await_outcome, Ledger, MigrateError, OrderSigner, RpcLedger, StorageOrder, SubmissionOutcome,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

const SUBSCRIPTION: &str = "sub-1";

#[derive(Clone, Copy)]
enum Script {
    /// ready, then inBlock with ExtrinsicSuccess
    Confirm,
    /// Status updates sent before the submit response
    NotifyFirst,
    /// Submission refused with an RPC error
    Refuse,
    /// ready, then the node hangs up
    HangUp,
}

fn response(id: &Value, result: Value) -> Message {
    Message::Text(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
}

fn notification(result: Value) -> Message {
    Message::Text(
        json!({
            "jsonrpc": "2.0",
            "method": "author_extrinsicUpdate",
            "params": {"subscription": SUBSCRIPTION, "result": result}
        })
        .to_string(),
    )
}

fn in_block() -> Message {
    notification(json!({
        "inBlock": {
            "block": "0xabc",
            "events": [{"section": "system", "method": "ExtrinsicSuccess", "data": []}]
        }
    }))
}

/// Start a node on an ephemeral port. Every request it receives is
/// forwarded on the returned channel.
async fn spawn_node(script: Script) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else { continue };
            let request: Value = serde_json::from_str(&text).unwrap();
            let _ = seen_tx.send(request.clone());
            let id = request["id"].clone();

            match request["method"].as_str().unwrap_or_default() {
                "system_chain" => ws.send(response(&id, json!("Elohim Dev"))).await.unwrap(),
                "system_accountNextIndex" => ws.send(response(&id, json!(7))).await.unwrap(),
                "author_unwatchExtrinsic" => ws.send(response(&id, json!(true))).await.unwrap(),
                "author_submitAndWatchExtrinsic" => match script {
                    Script::Confirm => {
                        ws.send(response(&id, json!(SUBSCRIPTION))).await.unwrap();
                        ws.send(notification(json!("ready"))).await.unwrap();
                        ws.send(in_block()).await.unwrap();
                    }
                    Script::NotifyFirst => {
                        ws.send(notification(json!("ready"))).await.unwrap();
                        ws.send(in_block()).await.unwrap();
                        ws.send(response(&id, json!(SUBSCRIPTION))).await.unwrap();
                    }
                    Script::Refuse => {
                        let error = json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": 1010, "message": "Invalid Transaction"}
                        });
                        ws.send(Message::Text(error.to_string())).await.unwrap();
                    }
                    Script::HangUp => {
                        ws.send(response(&id, json!(SUBSCRIPTION))).await.unwrap();
                        ws.send(notification(json!("ready"))).await.unwrap();
                        let _ = ws.close(None).await;
                        return;
                    }
                },
                _ => {}
            }
        }
    });

    (format!("ws://{}", addr), seen_rx)
}

fn signer() -> OrderSigner {
    OrderSigner::from_seed(&[42u8; 32])
}

fn config() -> LedgerConfig {
    LedgerConfig {
        request_timeout_secs: 5,
        ..Default::default()
    }
}

async fn next_request(seen: &mut mpsc::UnboundedReceiver<Value>, method: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let request = seen.recv().await.expect("node stopped");
            if request["method"] == method {
                return request;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} request", method))
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_order_confirmed_in_block() {
    let (endpoint, mut seen) = spawn_node(Script::Confirm).await;
    let ledger = RpcLedger::connect(&endpoint, signer(), &config()).await.unwrap();

    let stream = ledger
        .submit_order(&StorageOrder::new("bafy-order", 1234))
        .await
        .unwrap();
    let outcome = await_outcome(stream, Duration::from_secs(5)).await;
    assert_eq!(outcome, SubmissionOutcome::Success { block: "0xabc".into() });

    let submit = next_request(&mut seen, "author_submitAndWatchExtrinsic").await;
    let signed: SignedOrder = serde_json::from_value(submit["params"][0].clone()).unwrap();
    signed.verify().unwrap();
    assert_eq!(signed.nonce, 7);
    assert_eq!(signed.signer, signer().account());
    assert_eq!(signed.call.method, "placeStorageOrder");
    assert_eq!(signed.call.cid, "bafy-order");
    assert_eq!(signed.call.size, 1234);
    assert_eq!(signed.call.tip, 0);

    // The finished stream was dropped, so the subscription is released.
    let unwatch = next_request(&mut seen, "author_unwatchExtrinsic").await;
    assert_eq!(unwatch["params"], json!([SUBSCRIPTION]));

    ledger.disconnect().await;
}

#[tokio::test]
async fn test_notifications_before_subscription_id_are_kept() {
    let (endpoint, _seen) = spawn_node(Script::NotifyFirst).await;
    let ledger = RpcLedger::connect(&endpoint, signer(), &config()).await.unwrap();

    let stream = ledger
        .submit_order(&StorageOrder::new("bafy-early", 99))
        .await
        .unwrap();
    let outcome = await_outcome(stream, Duration::from_secs(5)).await;
    assert_eq!(outcome, SubmissionOutcome::Success { block: "0xabc".into() });

    ledger.disconnect().await;
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_refused_submission_is_an_error() {
    let (endpoint, _seen) = spawn_node(Script::Refuse).await;
    let ledger = RpcLedger::connect(&endpoint, signer(), &config()).await.unwrap();

    match ledger.submit_order(&StorageOrder::new("bafy-bad", 1)).await {
        Err(MigrateError::Rpc { code, .. }) => assert_eq!(code, 1010),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("submission should fail"),
    }

    ledger.disconnect().await;
}

#[tokio::test]
async fn test_hang_up_mid_watch_is_recoverable() {
    let (endpoint, _seen) = spawn_node(Script::HangUp).await;
    let ledger = RpcLedger::connect(&endpoint, signer(), &config()).await.unwrap();

    let stream = ledger
        .submit_order(&StorageOrder::new("bafy-lost", 5))
        .await
        .unwrap();
    match await_outcome(stream, Duration::from_secs(5)).await {
        SubmissionOutcome::RecoverableFailure(_) => {}
        other => panic!("unexpected: {:?}", other),
    }

    // Nothing more can be sent once the node is gone.
    assert!(ledger.submit_order(&StorageOrder::new("bafy-next", 5)).await.is_err());
    ledger.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_node_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    match RpcLedger::connect(&format!("ws://{}", addr), signer(), &config()).await {
        Err(MigrateError::LedgerConnect { endpoint, .. }) => assert_eq!(endpoint, format!("ws://{}", addr)),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connect should fail"),
    }
}
