//! Conversation transcript
//!
//! An append-only message list with two provider-facing policies: results
//! longer than the configured character budget are truncated before they
//! enter the transcript, and the provider only ever sees a bounded window of
//! the most recent messages. The window drops orphaned tool results at its
//! leading edge so the provider never receives a result without the
//! assistant turn that requested it.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::config::ChatSettings;
use crate::error::Result;
use crate::providers::base::{Message, ToolUse};

/// Marker appended to truncated tool results.
const TRUNCATION_SUFFIX: &str = "\n... [result truncated]";

/// Append-only transcript with windowing and truncation policies.
#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    max_history_messages: usize,
    max_result_chars: usize,
    history_file: PathBuf,
}

impl Conversation {
    /// Build an empty transcript with the configured policies.
    pub fn new(settings: &ChatSettings) -> Self {
        Self {
            messages: Vec::new(),
            max_history_messages: settings.max_history_messages,
            max_result_chars: settings.max_result_chars,
            history_file: settings.history_file.clone(),
        }
    }

    /// Append a user message.
    pub fn add_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Append a plain assistant message.
    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Append an assistant message carrying tool calls.
    pub fn add_assistant_tool_calls(&mut self, text: Option<String>, calls: Vec<ToolUse>) {
        self.messages.push(Message::assistant_with_tools(text, calls));
    }

    /// Append a tool result, truncating it to the configured budget.
    pub fn add_tool_result(&mut self, tool_call_id: impl Into<String>, content: &str) {
        let content = if content.chars().count() > self.max_result_chars {
            let mut truncated: String = content.chars().take(self.max_result_chars).collect();
            truncated.push_str(TRUNCATION_SUFFIX);
            truncated
        } else {
            content.to_string()
        };
        self.messages.push(Message::tool_result(tool_call_id, content));
    }

    /// The full transcript.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The window the provider sees: the most recent messages, with any
    /// leading tool results dropped (their assistant turn fell off the edge).
    pub fn window(&self) -> &[Message] {
        let mut start = self.messages.len().saturating_sub(self.max_history_messages);
        while start < self.messages.len() && self.messages[start].role == "tool" {
            start += 1;
        }
        &self.messages[start..]
    }

    /// Append this conversation to the history file as one saved session.
    ///
    /// The file holds `{"sessions": [...]}`; each session records a
    /// timestamp and the full transcript. An empty transcript is not saved.
    pub fn save(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Ok(());
        }
        self.save_to(&self.history_file)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let mut document: serde_json::Value = match std::fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).unwrap_or_else(|_| json!({ "sessions": [] }))
            }
            Err(_) => json!({ "sessions": [] }),
        };

        if !document["sessions"].is_array() {
            document["sessions"] = json!([]);
        }

        let session = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "messages": self.messages,
        });
        if let Some(sessions) = document["sessions"].as_array_mut() {
            sessions.push(session);
        }

        std::fs::write(path, serde_json::to_string_pretty(&document)?)?;
        tracing::debug!(path = %path.display(), "conversation saved");
        Ok(())
    }
}
