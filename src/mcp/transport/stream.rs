//! Stream transport for long-lived TCP servers
//!
//! [`StreamTransport`] connects to a TCP address and exchanges
//! newline-delimited JSON over the socket, with the same framing as the pipe
//! transport. Unlike the pipe transport there is no child process to manage,
//! and concurrent in-flight requests are correlated by id, so the transport
//! advertises `multiplexed() == true`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::mcp::transport::Transport;
use crate::mcp::types::RpcReply;
use crate::mcp::wire::{start_read_loop, WireClient};

/// TCP-based transport with persistent bidirectional framing.
pub struct StreamTransport {
    wire: Arc<WireClient>,
    cancel: CancellationToken,
    closed: AtomicBool,
    timeout: Duration,
    address: String,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StreamTransport {
    /// Connect to `address` (a `host:port` pair) and start the reader and
    /// writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] when the connection cannot be
    /// established within `timeout`.
    pub async fn connect(
        address: String,
        timeout: Duration,
    ) -> std::result::Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Unreachable(format!("connect to {address} timed out")))?
            .map_err(|e| TransportError::Unreachable(format!("connect to {address} failed: {e}")))?;

        let (read_half, write_half) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        // Writer task: serialize outbound messages onto the socket. Exits
        // when the channel closes or the socket write fails.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut write_half = write_half;
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    maybe_msg = outbound_rx.recv() => {
                        let Some(msg) = maybe_msg else { break };
                        let line = format!("{}\n", msg);
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // Half-close so the peer observes EOF.
            let _ = write_half.shutdown().await;
        });

        // Reader task: one JSON object per line into the wire engine.
        // Dropping inbound_tx on EOF fails in-flight calls with Disconnected.
        tokio::spawn(async move {
            let reader = BufReader::new(read_half);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if inbound_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let wire = Arc::new(WireClient::new(outbound_tx));
        start_read_loop(inbound_rx, cancel.clone(), Arc::clone(&wire));

        Ok(Self {
            wire,
            cancel,
            closed: AtomicBool::new(false),
            timeout,
            address,
        })
    }
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
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
    }

    fn multiplexed(&self) -> bool {
        true
    }
}
