//! Pipe transport for child-process servers
//!
//! [`PipeTransport`] spawns a child process and exchanges newline-delimited
//! JSON over its stdin/stdout pipes. This is the standard transport for
//! locally-installed tool servers.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped before delivery).
//! - The child's stderr is drained and logged via `tracing::debug!`; stderr
//!   output is diagnostic only and MUST NOT be treated as an error condition.
//!
//! # Lifecycle
//!
//! [`PipeTransport::spawn`] starts three background Tokio tasks: a stdin
//! writer, a stdout reader feeding the wire engine, and a stderr drain. EOF
//! on stdout fails all in-flight calls with `Disconnected`. Dropping the
//! transport sends a best-effort SIGTERM (Unix) or `start_kill` elsewhere.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::mcp::transport::Transport;
use crate::mcp::types::RpcReply;
use crate::mcp::wire::{start_read_loop, WireClient};

/// Pipe-based transport that drives a child process.
pub struct PipeTransport {
    /// Request correlation engine shared with the read loop.
    wire: Arc<WireClient>,
    /// Handle to the spawned child process; used by `close` and `Drop`.
    child: Arc<Mutex<Child>>,
    /// Stops the read loop and drains pending calls.
    cancel: CancellationToken,
    /// Set once `close` has run; later calls fail without touching I/O.
    closed: AtomicBool,
    /// Per-request reply deadline.
    timeout: Duration,
}

impl std::fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeTransport")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PipeTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// The child's environment is built by clearing all inherited variables
    /// (`env_clear`) and applying the caller-supplied `env` map. If
    /// `working_dir` is `Some`, the child's working directory is set
    /// accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] if the process cannot be
    /// spawned or its stdio pipes are unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> std::result::Result<Self, TransportError> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear().envs(&env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Unreachable(format!(
                "failed to spawn server `{}`: {}",
                executable.display(),
                e
            ))
        })?;

        // Each handle is guaranteed Some because Stdio::piped() was set above.
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Unreachable("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Unreachable("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::Unreachable("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();

        // Background task: forward outbound messages -> child stdin.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stdout -> wire engine. Dropping
        // stdout_tx on EOF closes the inbound channel, which the read loop
        // treats as disconnection.
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(line).is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stderr as diagnostics.
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "toolbus::mcp::transport::stdio",
                    "server stderr: {}",
                    line
                );
            }
        });

        let wire = Arc::new(WireClient::new(stdin_tx));
        let cancel = CancellationToken::new();
        start_read_loop(stdout_rx, cancel.clone(), Arc::clone(&wire));

        Ok(Self {
            wire,
            child: Arc::new(Mutex::new(child)),
            cancel,
            closed: AtomicBool::new(false),
            timeout,
        })
    }

    fn terminate_child(child: &Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for PipeTransport {
    async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<RpcReply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("transport closed".into()));
        }
        self.wire.call(method, params, self.timeout).await
    }

    async fn notify(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("transport closed".into()));
        }
        self.wire.notify(method, params)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.wire.fail_all_pending().await;

        let mut child = self.child.lock().await;
        Self::terminate_child(&child);
        // Reap the child if it exits promptly; otherwise leave it to the OS.
        let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
    }
}

impl Drop for PipeTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// This method MUST NOT block; it is fire-and-forget.
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                Self::terminate_child(&child);
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_nonexistent_executable_returns_unreachable() {
        let result = PipeTransport::spawn(
            PathBuf::from("/nonexistent/binary/that/does/not/exist"),
            vec![],
            HashMap::new(),
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_call_after_close_is_disconnected_without_io() {
        // `cat` echoes stdin to stdout, which is enough to spawn against.
        let transport = match PipeTransport::spawn(
            PathBuf::from("cat"),
            vec![],
            HashMap::new(),
            None,
            Duration::from_secs(1),
        ) {
            Ok(t) => t,
            Err(_) => return,
        };

        transport.close().await;
        let err = transport
            .call("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = match PipeTransport::spawn(
            PathBuf::from("cat"),
            vec![],
            HashMap::new(),
            None,
            Duration::from_secs(1),
        ) {
            Ok(t) => t,
            Err(_) => return,
        };

        transport.close().await;
        transport.close().await;
    }

    #[tokio::test]
    async fn test_child_exit_fails_call_with_disconnected() {
        // `true` exits immediately, so stdout reaches EOF before any reply.
        let transport = match PipeTransport::spawn(
            PathBuf::from("true"),
            vec![],
            HashMap::new(),
            None,
            Duration::from_secs(5),
        ) {
            Ok(t) => t,
            Err(_) => return,
        };

        let err = transport
            .call("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_not_multiplexed() {
        let transport = match PipeTransport::spawn(
            PathBuf::from("cat"),
            vec![],
            HashMap::new(),
            None,
            Duration::from_secs(1),
        ) {
            Ok(t) => t,
            Err(_) => return,
        };
        assert!(!transport.multiplexed());
        transport.close().await;
    }
}
