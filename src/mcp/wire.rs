//! Channel-backed JSON-RPC request/response correlation
//!
//! [`WireClient`] is shared by the pipe and stream transports: both frame
//! messages as newline-delimited JSON over a full-duplex byte channel, so the
//! correlation logic lives here once. Callers wire up two [`tokio::sync::mpsc`]
//! channels (outbound serialized messages, inbound serialized messages) and
//! call [`start_read_loop`] to resolve responses concurrently.
//!
//! In-flight requests are tracked in a `pending` map keyed by `u64` request
//! id. Each entry is a `oneshot::Sender` resolved when the matching response
//! arrives. A [`CancellationToken`] stops the read loop and drops all pending
//! senders so awaiting callers fail with `Disconnected` instead of hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, RpcReply};

/// The pending-response map: request id to the oneshot that resolves it.
type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Correlates JSON-RPC requests with their responses over a message channel.
pub struct WireClient {
    /// Monotonically increasing request id counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Arc<Mutex<PendingMap>>,
    /// Channel used to hand serialized messages to the transport writer.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Set when the read loop exits; calls registered after that point must
    /// fail fast instead of waiting out their timeout.
    dead: AtomicBool,
}

impl std::fmt::Debug for WireClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WireClient {
    /// Create a new `WireClient`. The caller is responsible for wiring the
    /// matching outbound receiver to a writer task and for calling
    /// [`start_read_loop`] with the inbound receiver.
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            dead: AtomicBool::new(false),
        }
    }

    /// Send a request and await the matching response within `timeout`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Disconnected`] when the writer or read loop is gone
    /// - [`TransportError::Timeout`] when no response arrives in time; the
    ///   pending slot is removed so a late response is ignored
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<RpcReply, TransportError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected(
                "connection closed".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it. Re-check `dead` under the
        // lock: the read loop drains pending with the same lock held, so a
        // slot inserted after that drain would otherwise wait out its timeout.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.dead.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected(
                    "connection closed".to_string(),
                ));
            }
            pending.insert(id, tx);
        }

        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| TransportError::Protocol(format!("serialize request: {e}")))?;

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Disconnected(
                "outbound channel closed".to_string(),
            ));
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Forget the slot; a straggler response must not leak memory
                // or resolve a future nobody holds.
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Timeout(timeout));
            }
        };

        // The oneshot was dropped: the read loop exited before answering.
        let rpc_result = outcome.map_err(|_| {
            TransportError::Disconnected("connection closed before response arrived".to_string())
        })?;

        Ok(match rpc_result {
            Ok(value) => RpcReply::Result(value),
            Err(e) => RpcReply::Error(e),
        })
    }

    /// Send a notification (no id, no response expected).
    pub fn notify(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        let message = serde_json::to_string(&JsonRpcRequest::notification(method, params))
            .map_err(|e| TransportError::Protocol(format!("serialize notification: {e}")))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| TransportError::Disconnected("outbound channel closed".to_string()))
    }

    /// Mark the connection dead and drop every pending sender so in-flight
    /// callers fail promptly.
    pub async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        self.dead.store(true, Ordering::SeqCst);
        pending.clear();
    }
}

/// Start the read loop as a background Tokio task.
///
/// Reads serialized JSON strings from `inbound_rx` and resolves the matching
/// pending sender for each response. Server-sent notifications are logged and
/// dropped: this host registers no interest in them. On cancellation or
/// inbound-channel close, all pending senders are dropped.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    wire: Arc<WireClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    wire.fail_all_pending().await;
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let raw = match maybe_msg {
                        Some(s) => s,
                        None => {
                            // EOF from the transport reader.
                            wire.fail_all_pending().await;
                            break;
                        }
                    };

                    dispatch_message(&raw, &wire).await;
                }
            }
        }
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, wire: &Arc<WireClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("wire read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some() && !value["id"].is_null();
    let has_method = value.get("method").is_some();

    if has_id && !has_method {
        resolve_response(value, wire).await;
    } else if has_method {
        tracing::debug!(
            "wire read loop: ignoring server-sent message '{}'",
            value["method"].as_str().unwrap_or("?")
        );
    } else {
        tracing::debug!("wire read loop: received unclassifiable message; ignoring");
    }
}

/// Resolve a pending request sender with the response value or error.
async fn resolve_response(value: serde_json::Value, wire: &Arc<WireClient>) {
    let id_val = &value["id"];
    let id: u64 = if let Some(n) = id_val.as_u64() {
        n
    } else if let Some(s) = id_val.as_str() {
        match s.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("wire read loop: response has non-integer id: {id_val}");
                return;
            }
        }
    } else {
        tracing::warn!("wire read loop: response has non-integer id: {id_val}");
        return;
    };

    let tx = {
        let mut pending = wire.pending.lock().await;
        pending.remove(&id)
    };

    let Some(tx) = tx else {
        tracing::debug!("wire read loop: response for unknown id {id}; ignoring");
        return;
    };

    let outcome: std::result::Result<serde_json::Value, JsonRpcError> =
        if let Some(error_val) = value.get("error") {
            match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
                Ok(e) => Err(e),
                Err(_) => Err(JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {error_val}"),
                    data: None,
                }),
            }
        } else {
            Ok(value
                .get("result")
                .cloned()
                .unwrap_or(serde_json::Value::Null))
        };

    // Ignore send errors: the caller may have already timed out.
    let _ = tx.send(outcome);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_wire() -> (
        Arc<WireClient>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let wire = Arc::new(WireClient::new(out_tx));
        start_read_loop(in_rx, token.clone(), Arc::clone(&wire));
        (wire, out_rx, in_tx, token)
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (wire, mut out_rx, in_tx, _token) = make_wire();

        tokio::spawn(async move {
            let sent = out_rx.recv().await.unwrap();
            let req: serde_json::Value = serde_json::from_str(&sent).unwrap();
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "result": { "tools": [] }
            });
            in_tx
                .send(serde_json::to_string(&response).unwrap())
                .unwrap();
        });

        let reply = wire
            .call("tools/list", serde_json::json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        match reply {
            RpcReply::Result(v) => assert_eq!(v["tools"], serde_json::json!([])),
            RpcReply::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_call_times_out_and_clears_pending() {
        let (wire, _out_rx, _in_tx, _token) = make_wire();

        let err = wire
            .call(
                "tools/call",
                serde_json::json!({}),
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(wire.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_response_surfaces_as_rpc_error() {
        let (wire, mut out_rx, in_tx, _token) = make_wire();

        tokio::spawn(async move {
            let sent = out_rx.recv().await.unwrap();
            let req: serde_json::Value = serde_json::from_str(&sent).unwrap();
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32601, "message": "Method not found" }
            });
            in_tx
                .send(serde_json::to_string(&response).unwrap())
                .unwrap();
        });

        let reply = wire
            .call("bogus/method", serde_json::json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        match reply {
            RpcReply::Error(e) => assert_eq!(e.code, -32601),
            RpcReply::Result(_) => panic!("expected an error reply"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_fails_in_flight_call() {
        let (wire, _out_rx, _in_tx, token) = make_wire();

        let wire_clone = Arc::clone(&wire);
        let call = tokio::spawn(async move {
            wire_clone
                .call("tools/call", serde_json::json!({}), Duration::from_secs(10))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call did not resolve after cancellation")
            .expect("task panicked");
        assert!(matches!(outcome, Err(TransportError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_inbound_eof_fails_in_flight_call() {
        let (wire, _out_rx, in_tx, _token) = make_wire();

        let wire_clone = Arc::clone(&wire);
        let call = tokio::spawn(async move {
            wire_clone
                .call("tools/call", serde_json::json!({}), Duration::from_secs(10))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(in_tx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call did not resolve after EOF")
            .expect("task panicked");
        assert!(matches!(outcome, Err(TransportError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_independently() {
        let (wire, mut out_rx, in_tx, _token) = make_wire();

        tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                let req: serde_json::Value = serde_json::from_str(&raw).unwrap();
                let resp = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "result": { "echo": req["id"] }
                });
                in_tx.send(serde_json::to_string(&resp).unwrap()).unwrap();
            }
        });

        let (r1, r2, r3) = tokio::join!(
            wire.call("ping", serde_json::json!({}), Duration::from_secs(5)),
            wire.call("ping", serde_json::json!({}), Duration::from_secs(5)),
            wire.call("ping", serde_json::json!({}), Duration::from_secs(5)),
        );

        let ids: std::collections::HashSet<u64> = [r1, r2, r3]
            .into_iter()
            .map(|r| match r.unwrap() {
                RpcReply::Result(v) => v["echo"].as_u64().unwrap(),
                RpcReply::Error(e) => panic!("unexpected error: {e}"),
            })
            .collect();
        assert_eq!(ids.len(), 3, "each call should resolve with its own id");
    }

    #[tokio::test]
    async fn test_notify_has_no_id() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let wire = WireClient::new(out_tx);

        wire.notify("notifications/initialized", serde_json::json!({}))
            .unwrap();

        let raw = out_rx.recv().await.unwrap();
        let val: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(val["method"], "notifications/initialized");
        assert!(val.get("id").is_none());
    }

    #[tokio::test]
    async fn test_late_response_after_timeout_is_ignored() {
        let (wire, mut out_rx, in_tx, _token) = make_wire();

        let err = wire
            .call("slow/op", serde_json::json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));

        // Deliver the response after the caller gave up; the loop must not
        // panic and the pending map stays empty.
        let sent = out_rx.recv().await.unwrap();
        let req: serde_json::Value = serde_json::from_str(&sent).unwrap();
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "result": {}
        });
        in_tx
            .send(serde_json::to_string(&response).unwrap())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(wire.pending.lock().await.is_empty());
    }
}
