//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all server transports
//! satisfy. Concrete implementations live in submodules:
//!
//! - [`stdio::PipeTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - [`http::HttpTransport`] -- one JSON-RPC POST per call against a fixed
//!   endpoint; naturally multiplexed.
//! - [`stream::StreamTransport`] -- long-lived TCP connection with the same
//!   framing as the pipe transport, multiplexed by request id.
//! - [`fake::FakeTransport`] -- scripted in-process fake (cfg(test) only).
//!
//! # Design
//!
//! The trait is one capability per transport kind: issue a request and get
//! the matching reply. Correlation, framing, and process lifecycle are each
//! implementation's concern; sessions and the registry never see them. A
//! peer's structured JSON-RPC error object is a *completed* exchange
//! ([`RpcReply::Error`]), not a transport failure.

use serde_json::Value;

use crate::error::TransportError;
use crate::mcp::types::RpcReply;

/// Abstraction over server transports.
///
/// Used polymorphically through `Box<dyn Transport>` inside a session.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Issue a JSON-RPC request and await the matching reply.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Disconnected`] when the peer went away or the
    ///   transport was closed
    /// - [`TransportError::Unreachable`] when the peer cannot be reached
    /// - [`TransportError::Timeout`] when no reply arrives within the
    ///   transport's configured bound
    /// - [`TransportError::Protocol`] when the reply violates the framing or
    ///   the JSON-RPC envelope
    async fn call(&self, method: &str, params: Value)
        -> std::result::Result<RpcReply, TransportError>;

    /// Send a fire-and-forget notification (no reply expected).
    async fn notify(&self, method: &str, params: Value)
        -> std::result::Result<(), TransportError>;

    /// Release the transport's resources. Idempotent and best-effort: a
    /// second call is a no-op, and failures are logged rather than surfaced.
    async fn close(&self);

    /// Whether this transport correlates concurrent in-flight requests.
    ///
    /// Sessions serialize calls on transports that return `false`.
    fn multiplexed(&self) -> bool {
        false
    }
}

pub mod http;
pub mod stdio;
pub mod stream;

#[cfg(test)]
pub mod fake;
