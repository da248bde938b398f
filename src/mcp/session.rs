//! Per-server connection lifecycle
//!
//! A [`ServerSession`] owns exactly one transport and moves through
//! `Connecting -> Ready -> Closed`. The connect-time handshake negotiates a
//! protocol version and fetches the server's tool declarations; after that
//! the session's only job is [`ServerSession::invoke`], which maps transport
//! failures into the recoverable [`ToolError`] taxonomy. `Disconnected` and
//! `Protocol` failures close the session permanently; once closed, every
//! invoke fails with `SessionClosed` without touching the transport.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use serde_json::json;
use tokio::sync::Mutex;

use crate::config::{ServerDescriptor, TransportKind};
use crate::error::{Result, ToolError, ToolbusError, TransportError};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::stdio::PipeTransport;
use crate::mcp::transport::stream::StreamTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, InitializeParams, InitializeResponse, ListToolsResponse,
    RpcReply, ToolDescriptor, CODE_INVALID_PARAMS, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in progress; no tool calls accepted yet.
    Connecting,
    /// Handshake complete; tool calls flow.
    Ready,
    /// Terminal. Entered by `close` or by a fatal transport failure.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// One connected server: a transport plus the tools it declared.
pub struct ServerSession {
    name: String,
    transport: Box<dyn Transport>,
    tools: Vec<ToolDescriptor>,
    state: StdMutex<SessionState>,
    /// Serializes invokes when the transport cannot correlate concurrent
    /// in-flight requests.
    serialize: Option<Mutex<()>>,
    /// Tool invocations that reached the transport.
    invocations: AtomicUsize,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    /// Build the transport named by `descriptor` and run the handshake.
    ///
    /// The handshake is `initialize` (with a protocol version check), the
    /// `notifications/initialized` notification, then `tools/list` with
    /// cursor pagination. Any failure closes the transport and surfaces as
    /// [`ToolbusError::Handshake`] or [`ToolbusError::ProtocolVersion`].
    pub async fn connect(descriptor: &ServerDescriptor) -> Result<Self> {
        tracing::debug!(server = %descriptor.name, transport = %descriptor.transport, "connecting");

        let transport: Box<dyn Transport> = match descriptor.transport {
            TransportKind::Pipe => {
                let command = descriptor.command.clone().ok_or_else(|| {
                    ToolbusError::MalformedDescriptor {
                        server: descriptor.name.clone(),
                        message: "pipe transport requires a command".to_string(),
                    }
                })?;
                Box::new(PipeTransport::spawn(
                    PathBuf::from(command),
                    descriptor.args.clone(),
                    descriptor.env.clone(),
                    descriptor.working_dir.clone(),
                    descriptor.timeout,
                )?)
            }
            TransportKind::Http => {
                let url = descriptor
                    .url
                    .clone()
                    .ok_or_else(|| ToolbusError::MalformedDescriptor {
                        server: descriptor.name.clone(),
                        message: "http transport requires a url".to_string(),
                    })?;
                Box::new(HttpTransport::new(url, descriptor.timeout)?)
            }
            TransportKind::Stream => {
                let address = descriptor.address.clone().ok_or_else(|| {
                    ToolbusError::MalformedDescriptor {
                        server: descriptor.name.clone(),
                        message: "stream transport requires an address".to_string(),
                    }
                })?;
                Box::new(StreamTransport::connect(address, descriptor.timeout).await?)
            }
        };

        Self::connect_over(descriptor.name.clone(), transport).await
    }

    /// Run the handshake over an already-built transport.
    pub(crate) async fn connect_over(name: String, transport: Box<dyn Transport>) -> Result<Self> {
        let tools = match Self::handshake(transport.as_ref(), &name).await {
            Ok(tools) => tools,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        tracing::info!(server = %name, tools = tools.len(), "session ready");

        let serialize = if transport.multiplexed() {
            None
        } else {
            Some(Mutex::new(()))
        };

        Ok(Self {
            name,
            transport,
            tools,
            state: StdMutex::new(SessionState::Ready),
            serialize,
            invocations: AtomicUsize::new(0),
        })
    }

    async fn handshake(transport: &dyn Transport, name: &str) -> Result<Vec<ToolDescriptor>> {
        let handshake_err = |message: String| ToolbusError::Handshake {
            server: name.to_string(),
            message,
        };

        let reply = transport
            .call(
                METHOD_INITIALIZE,
                serde_json::to_value(InitializeParams::for_host())
                    .map_err(ToolbusError::Serialization)?,
            )
            .await
            .map_err(|e| handshake_err(e.to_string()))?;
        let value = reply
            .into_result()
            .map_err(|e| handshake_err(e.to_string()))?;
        let init: InitializeResponse = serde_json::from_value(value)
            .map_err(|e| handshake_err(format!("malformed initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(ToolbusError::ProtocolVersion {
                server: name.to_string(),
                got: init.protocol_version,
            }
            .into());
        }

        // Best-effort: some servers don't care about this notification.
        if let Err(e) = transport.notify(METHOD_INITIALIZED, json!({})).await {
            tracing::debug!(server = %name, "initialized notification failed: {e}");
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let reply = transport
                .call(METHOD_TOOLS_LIST, params)
                .await
                .map_err(|e| handshake_err(e.to_string()))?;
            let value = reply
                .into_result()
                .map_err(|e| handshake_err(e.to_string()))?;
            let page: ListToolsResponse = serde_json::from_value(value)
                .map_err(|e| handshake_err(format!("malformed tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        Ok(tools)
    }

    /// Host-side server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools declared by this server at connect time.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// How many invocations reached the transport over this session's life.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, state)
    }

    /// Invoke `tool` with `args` and return the flattened text result.
    ///
    /// Transport failures map onto [`ToolError`]: `Disconnected` and
    /// `Protocol` close the session and surface as `Unavailable`; `Timeout`
    /// and `Unreachable` surface as `Unavailable` with the session left open,
    /// with only the timeout marked retryable. Once the session is `Closed`,
    /// this fails with `SessionClosed` without performing any I/O.
    pub async fn invoke(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        if self.state() == SessionState::Closed {
            return Err(ToolError::SessionClosed);
        }
        if !self.tools.iter().any(|t| t.name == tool) {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }

        let _guard = match &self.serialize {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // Re-check after waiting on the lock: an earlier call may have hit a
        // fatal failure while this one was queued.
        if self.state() == SessionState::Closed {
            return Err(ToolError::SessionClosed);
        }

        self.invocations.fetch_add(1, Ordering::SeqCst);

        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments: Some(args),
        })
        .map_err(|e| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("unserializable arguments: {e}"),
        })?;

        let reply = match self.transport.call(METHOD_TOOLS_CALL, params).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.map_transport_error(tool, e).await),
        };

        match reply {
            RpcReply::Error(e) if e.code == CODE_INVALID_PARAMS => {
                Err(ToolError::InvalidArguments {
                    tool: tool.to_string(),
                    message: e.message,
                })
            }
            RpcReply::Error(e) => Err(ToolError::ServerReported(e.to_string())),
            RpcReply::Result(value) => {
                let response: CallToolResponse =
                    serde_json::from_value(value).map_err(|e| {
                        ToolError::ServerReported(format!("malformed tool result: {e}"))
                    })?;
                let text = response.render_text();
                if response.is_error == Some(true) {
                    Err(ToolError::ServerReported(text))
                } else {
                    Ok(text)
                }
            }
        }
    }

    async fn map_transport_error(&self, tool: &str, e: TransportError) -> ToolError {
        match e {
            TransportError::Disconnected(_) | TransportError::Protocol(_) => {
                tracing::warn!(server = %self.name, %tool, "fatal transport failure, closing session: {e}");
                self.close_internal().await;
                ToolError::Unavailable {
                    reason: format!("{e} (session closed)"),
                    retryable: false,
                }
            }
            // Only timeouts mark the call retryable; the registry honors
            // that with at most one more attempt.
            TransportError::Timeout(d) => ToolError::Unavailable {
                reason: format!("no response after {d:?}"),
                retryable: true,
            },
            TransportError::Unreachable(m) => ToolError::Unavailable {
                reason: m,
                retryable: false,
            },
        }
    }

    async fn close_internal(&self) {
        let previous = self.set_state(SessionState::Closed);
        if previous != SessionState::Closed {
            self.transport.close().await;
        }
    }

    /// Close the session and release the transport. Idempotent.
    pub async fn close(&self) {
        self.close_internal().await;
        tracing::debug!(server = %self.name, "session closed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::mcp::transport::fake::FakeTransport;
    use std::sync::Arc;

    /// Build a ready session over a fake transport, skipping the handshake.
    pub(crate) fn session_with(name: &str, fake: FakeTransport) -> ServerSession {
        let tools = fake.tools().to_vec();
        let serialize = if fake.multiplexed() {
            None
        } else {
            Some(Mutex::new(()))
        };
        ServerSession {
            name: name.to_string(),
            transport: Box::new(fake),
            tools,
            state: StdMutex::new(SessionState::Ready),
            serialize,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Convenience wrapper returning an `Arc` for registry tests.
    pub(crate) fn arc_session_with(name: &str, fake: FakeTransport) -> Arc<ServerSession> {
        Arc::new(session_with(name, fake))
    }
}
