//! HTTP transport: one JSON-RPC POST per call
//!
//! [`HttpTransport`] issues each request as an independent `POST` against a
//! fixed endpoint, with the JSON-RPC envelope as the body and the response
//! body parsed as the JSON-RPC reply. There is no connection state to keep,
//! so the transport is naturally multiplexed and `close` only flips a flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::TransportError;
use crate::mcp::transport::Transport;
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse, RpcReply};

/// HTTP-based transport posting JSON-RPC envelopes to a fixed endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    /// Monotonic request id; ids are unique per transport even though HTTP
    /// pairs request and response for us.
    next_id: AtomicU64,
    closed: AtomicBool,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(endpoint: Url, timeout: Duration) -> std::result::Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Unreachable(format!("POST {} failed: {e}", self.endpoint))
        }
    }

    async fn post(&self, body: &JsonRpcRequest) -> std::result::Result<reqwest::Response, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("transport closed".into()));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Protocol(format!(
                "unexpected HTTP status {status} from {}",
                self.endpoint
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<RpcReply, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self.post(&request).await?;

        let parsed: JsonRpcResponse = response.json().await.map_err(|e| {
            TransportError::Protocol(format!("malformed JSON-RPC response body: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Ok(RpcReply::Error(error));
        }
        Ok(RpcReply::Result(parsed.result.unwrap_or(Value::Null)))
    }

    async fn notify(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<(), TransportError> {
        let request = JsonRpcRequest::notification(method, params);
        self.post(&request).await?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn multiplexed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(Url::parse(url).unwrap(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_is_multiplexed() {
        let t = transport("http://127.0.0.1:9/rpc");
        assert!(t.multiplexed());
    }

    #[tokio::test]
    async fn test_call_after_close_is_disconnected() {
        let t = transport("http://127.0.0.1:9/rpc");
        t.close().await;
        let err = t
            .call("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        // Port 9 (discard) is almost certainly closed.
        let t = transport("http://127.0.0.1:9/rpc");
        let err = t
            .call("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let t = transport("http://127.0.0.1:9/rpc");
        t.close().await;
        t.close().await;
    }
}
