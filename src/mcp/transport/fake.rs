//! Scripted in-process transport for tests
//!
//! [`FakeTransport`] answers the handshake methods from its configured tool
//! list and serves `tools/call` from per-tool scripts: a canned text reply,
//! an optional artificial delay, or an injected transport failure. Counters
//! expose how many invocations and closes happened so tests can assert on
//! zero-I/O paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, RpcReply, ToolDescriptor, CODE_INVALID_PARAMS, LATEST_PROTOCOL_VERSION,
};

/// Script for one tool name.
#[derive(Debug, Clone)]
struct FakeTool {
    text: String,
    delay: Option<Duration>,
    is_error: bool,
}

/// In-process transport with scripted replies.
#[derive(Debug)]
pub struct FakeTransport {
    tools: Vec<ToolDescriptor>,
    scripts: Mutex<HashMap<String, FakeTool>>,
    /// Next `tools/call` fails with this transport error.
    fail_next: Mutex<Option<TransportError>>,
    /// Protocol version reported by `initialize`.
    protocol_version: Mutex<String>,
    /// Number of `tools/call` requests that reached the transport.
    invocations: AtomicUsize,
    /// Number of times `close` was called.
    closes: AtomicUsize,
    multiplexed: AtomicBool,
}

impl FakeTransport {
    /// Build a fake declaring the given `(name, description)` tools.
    pub fn new(tools: &[(&str, &str)]) -> Self {
        let tools = tools
            .iter()
            .map(|(name, description)| ToolDescriptor {
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
                server: String::new(),
            })
            .collect();
        Self {
            tools,
            scripts: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(None),
            protocol_version: Mutex::new(LATEST_PROTOCOL_VERSION.to_string()),
            invocations: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            multiplexed: AtomicBool::new(false),
        }
    }

    /// Script `tool` to reply with `text`.
    pub fn stub(&self, tool: &str, text: &str) {
        self.scripts.lock().unwrap().insert(
            tool.to_string(),
            FakeTool {
                text: text.to_string(),
                delay: None,
                is_error: false,
            },
        );
    }

    /// Script `tool` to reply with `text` after sleeping `delay`.
    pub fn stub_delayed(&self, tool: &str, text: &str, delay: Duration) {
        self.scripts.lock().unwrap().insert(
            tool.to_string(),
            FakeTool {
                text: text.to_string(),
                delay: Some(delay),
                is_error: false,
            },
        );
    }

    /// Script `tool` to reply with an `isError` tool result carrying `text`.
    pub fn stub_tool_error(&self, tool: &str, text: &str) {
        self.scripts.lock().unwrap().insert(
            tool.to_string(),
            FakeTool {
                text: text.to_string(),
                delay: None,
                is_error: true,
            },
        );
    }

    /// Make the next `tools/call` fail with `err` before any script runs.
    pub fn fail_next(&self, err: TransportError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    /// Report `version` from the `initialize` handshake.
    pub fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock().unwrap() = version.to_string();
    }

    pub fn set_multiplexed(&self, value: bool) {
        self.multiplexed.store(value, Ordering::SeqCst);
    }

    /// Tool descriptors this fake declares.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// How many `tools/call` requests reached this transport.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// How many times `close` ran.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn call_tool(&self, params: Value) -> std::result::Result<RpcReply, TransportError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }

        let name = params["name"].as_str().unwrap_or_default().to_string();
        let script = self.scripts.lock().unwrap().get(&name).cloned();

        let Some(script) = script else {
            return Ok(RpcReply::Error(JsonRpcError {
                code: CODE_INVALID_PARAMS,
                message: format!("no script for tool '{name}'"),
                data: None,
            }));
        };

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(RpcReply::Result(serde_json::json!({
            "content": [{ "type": "text", "text": script.text }],
            "isError": script.is_error,
        })))
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<RpcReply, TransportError> {
        match method {
            "initialize" => Ok(RpcReply::Result(serde_json::json!({
                "protocolVersion": *self.protocol_version.lock().unwrap(),
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "fake", "version": "0.0.0" },
            }))),
            "tools/list" => Ok(RpcReply::Result(serde_json::json!({
                "tools": &self.tools,
            }))),
            "tools/call" => self.call_tool(params).await,
            other => Ok(RpcReply::Error(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {other}"),
                data: None,
            })),
        }
    }

    async fn notify(&self, _method: &str, _params: Value) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn multiplexed(&self) -> bool {
        self.multiplexed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_methods_answer_from_config() {
        let fake = FakeTransport::new(&[("create_mood_playlist", "Build a playlist")]);
        let init = fake
            .call("initialize", serde_json::json!({}))
            .await
            .unwrap();
        match init {
            RpcReply::Result(v) => {
                assert_eq!(v["protocolVersion"], LATEST_PROTOCOL_VERSION)
            }
            RpcReply::Error(e) => panic!("unexpected error: {e}"),
        }

        let list = fake.call("tools/list", serde_json::json!({})).await.unwrap();
        match list {
            RpcReply::Result(v) => {
                assert_eq!(v["tools"][0]["name"], "create_mood_playlist")
            }
            RpcReply::Error(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(fake.invocations(), 0, "handshake must not count as a call");
    }

    #[tokio::test]
    async fn test_scripted_call_and_counter() {
        let fake = FakeTransport::new(&[("get_dataset_stats", "stats")]);
        fake.stub("get_dataset_stats", "12000 tracks");

        let reply = fake
            .call(
                "tools/call",
                serde_json::json!({ "name": "get_dataset_stats", "arguments": {} }),
            )
            .await
            .unwrap();
        match reply {
            RpcReply::Result(v) => assert_eq!(v["content"][0]["text"], "12000 tracks"),
            RpcReply::Error(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(fake.invocations(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_injects_transport_error() {
        let fake = FakeTransport::new(&[("t", "")]);
        fake.stub("t", "ok");
        fake.fail_next(TransportError::Disconnected("boom".into()));

        let err = fake
            .call("tools/call", serde_json::json!({ "name": "t" }))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));

        // Next call succeeds again.
        let reply = fake
            .call("tools/call", serde_json::json!({ "name": "t" }))
            .await
            .unwrap();
        assert!(matches!(reply, RpcReply::Result(_)));
    }
}
