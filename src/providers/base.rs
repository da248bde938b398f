//! Base provider trait and conversation message types
//!
//! Defines the [`Provider`] trait the dispatch loop drives, along with the
//! transcript [`Message`] type and the [`ToolUse`] requests a model turn can
//! carry. The loop never sees provider wire formats; providers translate
//! between these types and their own API.

use crate::error::Result;
use crate::mcp::types::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message structure for the conversation transcript
///
/// Messages can be from the user, the assistant, or a tool result keyed to a
/// prior assistant tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, tool)
    pub role: String,
    /// Content of the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Optional tool calls in the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolUse>>,
    /// Optional tool call ID (for tool result messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new tool result message
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Creates an assistant message carrying tool calls, with optional
    /// leading text.
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolUse>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }
}

/// One tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    /// Provider-assigned identifier correlating the call with its result.
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Argument payload, already parsed.
    pub arguments: serde_json::Value,
}

/// The model's output for one call: optional text plus zero or more tool
/// calls.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    /// Assistant text, if any.
    pub text: Option<String>,
    /// Tool calls, in the order the model requested them.
    pub tool_calls: Vec<ToolUse>,
}

impl ModelTurn {
    /// True when the model requested no tools and the turn is final.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Trait for model collaborators
///
/// The dispatch loop calls [`Provider::complete`] with the transcript window
/// and the aggregated tool catalog, and receives the model's next turn.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Request the next model turn.
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<ModelTurn>;

    /// Provider name for logs and summaries.
    fn name(&self) -> &str;
}
