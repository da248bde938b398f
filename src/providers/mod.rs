//! Model provider implementations
//!
//! The dispatch loop is provider-agnostic: it drives the [`Provider`] trait
//! from [`base`]. [`anthropic`] implements it against the Anthropic Messages
//! API, translating the tool catalog and transcript into that API's content
//! blocks.

pub mod anthropic;
pub mod base;

pub use anthropic::AnthropicProvider;
pub use base::{Message, ModelTurn, Provider, ToolUse};
