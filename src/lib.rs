//! Toolbus - multi-server tool-calling chat host
//!
//! Connects to a fleet of tool servers over pipe, HTTP, or TCP stream
//! transports, aggregates their tools into one catalog, and drives
//! conversations where a model can call any of them.
//!
//! # Architecture
//!
//! - `mcp`: transports, the wire client, server sessions, and the registry
//! - `providers`: the model provider abstraction and the Anthropic backend
//! - `dispatch`: the turn loop that batches and folds tool calls
//! - `conversation`: the transcript with windowing and truncation policies
//! - `chat`: the interactive readline front end
//! - `config`: YAML configuration and validation
//! - `error`: error types and the result alias

pub mod chat;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod providers;

// Re-export commonly used types
pub use config::{Config, ServerDescriptor};
pub use conversation::Conversation;
pub use dispatch::DispatchLoop;
pub use error::{Result, ToolError, ToolbusError, TransportError};
pub use mcp::{ServerRegistry, ServerSession, SessionState, ToolDescriptor, Transport};
pub use providers::{AnthropicProvider, Message, ModelTurn, Provider, ToolUse};
