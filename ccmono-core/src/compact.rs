//! Context compaction
//!
//! When estimated history tokens approach the model's context window, the
//! middle of the conversation is replaced by a one-shot summary from the
//! same provider. The first message (system framing) and the most recent
//! messages are kept verbatim.

use crate::error::AgentError;
use crate::provider::Provider;
use crate::types::{extract_text, AgentMessage, LlmContext, Message, StreamOptions, UserMessage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes conversations \
concisely. Focus on key decisions, actions taken, and important outcomes.";

/// Compaction tuning.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Total context window of the model, in tokens.
    pub context_window: usize,
    /// Tokens reserved for the response.
    pub safety_margin: usize,
    /// How many trailing messages to keep verbatim.
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            context_window: 0,
            safety_margin: 4096,
            keep_recent: 10,
        }
    }
}

/// Summarizes conversation history to fit the context window.
pub struct Compactor {
    provider: Arc<dyn Provider>,
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>, config: CompactionConfig) -> Self {
        Self { provider, config }
    }

    /// Rough token estimate: one token per four characters.
    pub fn estimate_tokens(&self, messages: &[AgentMessage]) -> usize {
        messages.iter().map(estimate_message_chars).sum::<usize>() / 4
    }

    /// Whether the history exceeds `ratio` of the usable window.
    pub fn needs_compaction(&self, messages: &[AgentMessage], ratio: f64) -> bool {
        if self.config.context_window <= self.config.safety_margin {
            return false;
        }
        let usable = self.config.context_window - self.config.safety_margin;
        let threshold = (usable as f64 * ratio) as usize;
        self.estimate_tokens(messages) > threshold
    }

    /// Replace the middle of the history with a summary message. Returns the
    /// input unchanged when there is nothing to compact.
    pub async fn compact(
        &self,
        cancel: CancellationToken,
        model: &crate::types::Model,
        messages: Vec<AgentMessage>,
    ) -> Result<Vec<AgentMessage>, AgentError> {
        if messages.len() <= self.config.keep_recent + 1 {
            return Ok(messages);
        }

        let head = &messages[..1];
        let middle = &messages[1..messages.len() - self.config.keep_recent];
        let recent = &messages[messages.len() - self.config.keep_recent..];

        if middle.is_empty() {
            return Ok(messages);
        }

        let summary = self.summarize(cancel, model, middle).await?;

        let mut compacted = Vec::with_capacity(head.len() + 1 + recent.len());
        compacted.extend_from_slice(head);
        compacted.push(summary);
        compacted.extend_from_slice(recent);
        Ok(compacted)
    }

    async fn summarize(
        &self,
        cancel: CancellationToken,
        model: &crate::types::Model,
        messages: &[AgentMessage],
    ) -> Result<AgentMessage, AgentError> {
        let mut transcript =
            String::from("Please provide a concise summary of the following conversation:\n\n");
        for msg in messages {
            match &msg.message {
                Message::User(user) => {
                    transcript.push_str("User: ");
                    transcript.push_str(&extract_text(&user.content));
                    transcript.push_str("\n\n");
                }
                Message::Assistant(assistant) => {
                    transcript.push_str("Assistant: ");
                    transcript.push_str(&extract_text(&assistant.content));
                    for call in assistant.tool_calls() {
                        transcript.push_str(&format!("\n  [Tool: {}]", call.name));
                    }
                    transcript.push_str("\n\n");
                }
                Message::ToolResult(result) => {
                    transcript.push_str(&format!("[Tool Result: {}]\n", result.tool_name));
                    transcript.push_str(&extract_text(&result.content));
                    transcript.push_str("\n\n");
                }
            }
        }

        let context = LlmContext {
            system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::User(UserMessage::text(transcript))],
        };

        let stream =
            self.provider
                .stream_simple(cancel, model, context, StreamOptions::default());
        let result = stream
            .drain()
            .await
            .map_err(|err| AgentError::Compaction(err.to_string()))?;

        let summary_text = extract_text(&result.content);
        let prefix = format!("[Summary of {} messages]:\n", messages.len());

        Ok(AgentMessage {
            message: Message::User(UserMessage::text(prefix + &summary_text)),
            id: crate::types::next_message_id("compaction"),
            // Anchor the summary where the span it replaces began.
            created_at: messages[0].created_at,
        })
    }
}

fn estimate_message_chars(msg: &AgentMessage) -> usize {
    let mut total = 0;
    match &msg.message {
        Message::User(user) => total += extract_text(&user.content).len(),
        Message::Assistant(assistant) => {
            total += extract_text(&assistant.content).len();
            for call in assistant.tool_calls() {
                total += call.name.len() + 50;
                for (key, value) in &call.params {
                    total += key.len() + value.to_string().len();
                }
            }
        }
        Message::ToolResult(result) => {
            total += result.tool_name.len() + extract_text(&result.content).len();
        }
    }
    total
}
