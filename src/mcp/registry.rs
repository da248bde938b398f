//! Server registry: session set, aggregated catalog, routing
//!
//! [`ServerRegistry::connect_all`] connects every configured server
//! concurrently and independently: one server failing to come up never
//! aborts the others, it is logged and recorded. After the connects settle
//! the registry aggregates each session's tools into a single catalog and a
//! tool-name routing table; two servers declaring the same tool name is a
//! fatal configuration error surfaced before any conversation starts.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::config::ServerDescriptor;
use crate::error::{Result, ToolError, ToolbusError};
use crate::mcp::session::{ServerSession, SessionState};
use crate::mcp::types::ToolDescriptor;

/// A server that failed its connect; kept for operator-facing summaries.
#[derive(Debug, Clone)]
pub struct ConnectFailure {
    /// Host-side server name.
    pub server: String,
    /// Why the connect failed.
    pub reason: String,
}

/// The set of live sessions plus the aggregated tool catalog.
pub struct ServerRegistry {
    sessions: HashMap<String, Arc<ServerSession>>,
    /// Tool name -> owning server name. Immutable after startup, so reads
    /// need no locking.
    routes: HashMap<String, String>,
    catalog: Vec<ToolDescriptor>,
    failures: Vec<ConnectFailure>,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("sessions", &self.sessions.len())
            .field("tools", &self.catalog.len())
            .field("failures", &self.failures.len())
            .finish()
    }
}

impl ServerRegistry {
    /// Connect every descriptor concurrently and aggregate the catalog.
    ///
    /// Individual connect failures are tolerated and recorded; an empty
    /// registry (zero descriptors, or all connects failed) is valid.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbusError::DuplicateToolName`] when two connected servers
    /// declare the same tool name.
    pub async fn connect_all(descriptors: &[ServerDescriptor]) -> Result<Self> {
        let connects = descriptors.iter().map(|d| async move {
            let outcome = ServerSession::connect(d).await;
            (d.name.clone(), outcome)
        });

        let mut sessions = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in join_all(connects).await {
            match outcome {
                Ok(session) => sessions.push(Arc::new(session)),
                Err(e) => {
                    tracing::warn!(server = %name, "connect failed: {e:#}");
                    failures.push(ConnectFailure {
                        server: name,
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        Self::aggregate(sessions, failures)
    }

    /// Build the routing table and catalog from connected sessions.
    fn aggregate(
        mut sessions: Vec<Arc<ServerSession>>,
        failures: Vec<ConnectFailure>,
    ) -> Result<Self> {
        // Deterministic catalog order regardless of connect completion order.
        sessions.sort_by(|a, b| a.name().cmp(b.name()));

        let mut routes: HashMap<String, String> = HashMap::new();
        let mut catalog = Vec::new();
        for session in &sessions {
            for tool in session.tools() {
                if let Some(first) = routes.get(&tool.name) {
                    return Err(ToolbusError::DuplicateToolName {
                        tool: tool.name.clone(),
                        first: first.clone(),
                        second: session.name().to_string(),
                    }
                    .into());
                }
                routes.insert(tool.name.clone(), session.name().to_string());
                let mut stamped = tool.clone();
                stamped.server = session.name().to_string();
                catalog.push(stamped);
            }
        }

        tracing::info!(
            servers = sessions.len(),
            tools = catalog.len(),
            failed = failures.len(),
            "registry ready"
        );

        Ok(Self {
            sessions: sessions
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
            routes,
            catalog,
            failures,
        })
    }

    /// The aggregated tool catalog, each descriptor stamped with its owning
    /// server.
    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Connected session names in catalog order.
    pub fn server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sessions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look up a live session by name.
    pub fn session(&self, server: &str) -> Option<&Arc<ServerSession>> {
        self.sessions.get(server)
    }

    /// Servers that failed their connect.
    pub fn failures(&self) -> &[ConnectFailure] {
        &self.failures
    }

    /// True when no server connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Route a tool call to its owning session.
    ///
    /// An unknown tool name fails with [`ToolError::UnknownTool`] before any
    /// session is touched. When the owning session marks the failure
    /// retryable (only timeouts are) and is still `Ready`, the call is
    /// retried exactly once.
    pub async fn route(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let server = self
            .routes
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;
        let session = self.sessions.get(server).ok_or_else(|| ToolError::Unavailable {
            reason: format!("server '{server}' is gone"),
            retryable: false,
        })?;

        match session.invoke(tool, args.clone()).await {
            Err(ToolError::Unavailable { reason, retryable: true })
                if session.state() == SessionState::Ready =>
            {
                tracing::warn!(server = %server, %tool, "retrying after timeout: {reason}");
                session.invoke(tool, args).await
            }
            outcome => outcome,
        }
    }

    /// Close every session, best-effort.
    pub async fn shutdown(&self) {
        join_all(self.sessions.values().map(|s| s.close())).await;
        tracing::info!("all sessions closed");
    }
}
