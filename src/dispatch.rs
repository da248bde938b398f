//! The dispatch loop: model turns in, tool batches out
//!
//! [`DispatchLoop::run_turn`] drives one user turn to completion: call the
//! provider, dispatch any requested tool calls as a concurrent batch, fold
//! the results back into the transcript in request order, and repeat until
//! the model produces a final text answer or the turn budget runs out.
//!
//! Tool failures are conversation content, not control flow: every
//! [`ToolError`] becomes a tool-result entry the model can react to. Only
//! provider failures and the turn budget abort a turn.

use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use crate::config::ChatSettings;
use crate::conversation::Conversation;
use crate::error::{Result, ToolError, ToolbusError};
use crate::mcp::registry::ServerRegistry;
use crate::providers::base::{Provider, ToolUse};

/// Shown when the model ends a turn with tool calls but no text.
const EMPTY_ANSWER: &str = "(no answer)";

/// Drives conversations against a provider and a server registry.
pub struct DispatchLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<ServerRegistry>,
    conversation: Conversation,
    max_turns: usize,
}

impl DispatchLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ServerRegistry>,
        settings: &ChatSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            conversation: Conversation::new(settings),
            max_turns: settings.max_turns,
        }
    }

    /// The transcript accumulated so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Run one user turn to completion and return the final assistant text.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbusError::MaxTurnsExceeded`] when the model keeps
    /// requesting tools past the configured budget, or a provider error when
    /// a model call fails. Tool errors never surface here.
    pub async fn run_turn(&mut self, user_input: &str) -> Result<String> {
        self.conversation.add_user(user_input);

        for turn in 1..=self.max_turns {
            let model_turn = self
                .provider
                .complete(self.conversation.window(), self.registry.catalog())
                .await?;

            if model_turn.is_final() {
                let answer = model_turn.text.unwrap_or_else(|| EMPTY_ANSWER.to_string());
                self.conversation.add_assistant(answer.clone());
                return Ok(answer);
            }

            let calls = normalize_ids(model_turn.tool_calls);
            tracing::debug!(turn, batch = calls.len(), "dispatching tool batch");
            self.conversation
                .add_assistant_tool_calls(model_turn.text, calls.clone());

            // The whole batch runs concurrently; join_all yields results in
            // request order regardless of completion order, which fixes the
            // transcript order.
            let outcomes = join_all(
                calls
                    .iter()
                    .map(|call| self.registry.route(&call.name, call.arguments.clone())),
            )
            .await;

            for (call, outcome) in calls.iter().zip(outcomes) {
                let content = match outcome {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(tool = %call.name, "tool call failed: {e}");
                        render_tool_error(&e)
                    }
                };
                self.conversation.add_tool_result(&call.id, &content);
            }
        }

        Err(ToolbusError::MaxTurnsExceeded {
            limit: self.max_turns,
        }
        .into())
    }
}

/// Give every call a non-empty correlation id.
fn normalize_ids(calls: Vec<ToolUse>) -> Vec<ToolUse> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() {
                call.id = format!("call_{}", Uuid::new_v4());
            }
            call
        })
        .collect()
}

/// Fold a tool failure into transcript text the model can react to.
fn render_tool_error(e: &ToolError) -> String {
    format!("error[{}]: {e}", e.kind())
}
