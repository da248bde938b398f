//! Anthropic Messages API provider
//!
//! Translates the transcript into Anthropic content blocks: assistant tool
//! calls become `tool_use` blocks, tool results become `tool_result` blocks
//! inside a user message, and consecutive tool results are merged into one
//! user message because the API requires alternating roles.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ChatSettings;
use crate::error::{Result, ToolbusError};
use crate::mcp::types::ToolDescriptor;
use crate::providers::base::{Message, ModelTurn, Provider, ToolUse};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    /// Build a provider from chat settings; the API key comes from config or
    /// the `ANTHROPIC_API_KEY` environment variable.
    pub fn new(settings: &ChatSettings, system: Option<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: settings.resolve_api_key()?,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            system,
        })
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": build_messages(messages),
        });
        if let Some(system) = &self.system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_definition).collect());
            body["tool_choice"] = json!({ "type": "auto" });
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<ModelTurn> {
        let body = self.request_body(messages, tools);

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolbusError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let snippet: String = detail.chars().take(300).collect();
            return Err(ToolbusError::Provider(format!("API returned {status}: {snippet}")).into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ToolbusError::Provider(format!("malformed response body: {e}")))?;

        parse_turn(&payload)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Map one catalog entry to the API's tool definition shape.
fn tool_definition(tool: &ToolDescriptor) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "input_schema": tool.input_schema,
    })
}

/// Translate transcript messages into Anthropic message objects.
///
/// Tool results must appear as `tool_result` blocks inside a `user` message;
/// consecutive results are merged into one message to keep roles alternating.
fn build_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush_results = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({
                "role": "user",
                "content": std::mem::take(pending),
            }));
        }
    };

    for message in messages {
        match message.role.as_str() {
            "tool" => {
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.clone().unwrap_or_default(),
                }));
            }
            "assistant" => {
                flush_results(&mut out, &mut pending_results);
                match &message.tool_calls {
                    Some(calls) => {
                        let mut blocks: Vec<Value> = Vec::new();
                        if let Some(text) = &message.content {
                            if !text.is_empty() {
                                blocks.push(json!({ "type": "text", "text": text }));
                            }
                        }
                        for call in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                        out.push(json!({ "role": "assistant", "content": blocks }));
                    }
                    None => {
                        out.push(json!({
                            "role": "assistant",
                            "content": message.content.clone().unwrap_or_default(),
                        }));
                    }
                }
            }
            _ => {
                flush_results(&mut out, &mut pending_results);
                out.push(json!({
                    "role": "user",
                    "content": message.content.clone().unwrap_or_default(),
                }));
            }
        }
    }
    flush_results(&mut out, &mut pending_results);
    out
}

/// Extract text and tool calls from a Messages API response payload.
fn parse_turn(payload: &Value) -> Result<ModelTurn> {
    let content = payload["content"]
        .as_array()
        .ok_or_else(|| ToolbusError::Provider("response has no content array".to_string()))?;

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolUse> = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block.get("input").cloned().unwrap_or(json!({})),
                });
            }
            other => {
                tracing::debug!("ignoring content block of type {other:?}");
            }
        }
    }

    let text = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    };

    Ok(ModelTurn { text, tool_calls })
}
