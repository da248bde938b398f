//! Multi-server tool protocol: transports, sessions, registry
//!
//! Layering, bottom up:
//!
//! - [`wire`] correlates JSON-RPC requests with responses over a message
//!   channel (shared by the pipe and stream transports).
//! - [`transport`] is the per-medium exchange: pipe, http, stream.
//! - [`session`] owns one transport and its lifecycle state machine.
//! - [`registry`] owns all sessions, the aggregated catalog, and routing.

pub mod registry;
pub mod session;
pub mod transport;
pub mod types;
pub mod wire;

pub use registry::{ConnectFailure, ServerRegistry};
pub use session::{ServerSession, SessionState};
pub use transport::Transport;
pub use types::ToolDescriptor;
