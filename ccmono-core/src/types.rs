//! Core message and model types for cc-mono
//!
//! These types form the representation boundary for history snapshots and the
//! RPC wire format. Messages are closed tagged sums that round-trip through a
//! `"type"`-discriminated JSON form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(_) => 0,
    }
}

/// A message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// User input
    User(UserMessage),
    /// Assistant response (may include tool calls)
    Assistant(AssistantMessage),
    /// Result of a tool execution
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Timestamp of the message in epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        match self {
            Message::User(m) => m.timestamp,
            Message::Assistant(m) => m.timestamp,
            Message::ToolResult(m) => m.timestamp,
        }
    }

    /// Content blocks of the message.
    pub fn content(&self) -> &[Content] {
        match self {
            Message::User(m) => &m.content,
            Message::Assistant(m) => &m.content,
            Message::ToolResult(m) => &m.content,
        }
    }
}

/// User message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: Vec<Content>,
    pub timestamp: i64,
}

impl UserMessage {
    pub fn new(content: Vec<Content>) -> Self {
        Self {
            content,
            timestamp: now_millis(),
        }
    }

    /// Build a user message holding a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Content::text(text)])
    }
}

/// Assistant message with potential tool calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<Content>,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl AssistantMessage {
    pub fn new(
        content: Vec<Content>,
        provider: impl Into<String>,
        model: impl Into<String>,
        usage: Usage,
        stop_reason: StopReason,
    ) -> Self {
        Self {
            content,
            provider: provider.into(),
            model: model.into(),
            usage,
            stop_reason,
            error_message: None,
            timestamp: now_millis(),
        }
    }

    /// Iterate over the tool calls in this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|c| match c {
            Content::ToolCall(tc) => Some(tc),
            _ => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}

/// Result of a tool execution, fed back into history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    pub timestamp: i64,
}

impl ToolResultMessage {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Content>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            details: None,
            is_error,
            timestamp: now_millis(),
        }
    }
}

/// A block of content inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text
    Text { text: String },
    /// Reasoning/thinking emitted by the model
    Thinking { thinking: String },
    /// Tool use request from the model
    ToolCall(ToolCall),
    /// Inline image
    Image { source: ImageSource },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Content::Thinking {
            thinking: thinking.into(),
        }
    }
}

/// Concatenate the text blocks of a content list.
pub fn extract_text(content: &[Content]) -> String {
    let mut out = String::new();
    for block in content {
        if let Content::Text { text } = block {
            out.push_str(text);
        }
    }
    out
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub params: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
        }
    }

    /// String parameter by key, if present.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Source of an image content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImageSource {
    /// "url" or "base64"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub media_type: String,
}

impl ImageSource {
    pub fn base64(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            kind: "base64".to_string(),
            url: None,
            data: Some(data.into()),
            media_type: media_type.into(),
        }
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model finished naturally
    #[default]
    EndTurn,
    /// Hit max output tokens
    MaxTokens,
    /// Model wants to call tools
    ToolUse,
    /// Hit a stop sequence
    StopSequence,
    /// Stream failed
    Error,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Accumulate usage from another turn.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Level of thinking/reasoning requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    /// Next level in the cycle none -> low -> medium -> high -> none.
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// An LLM model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Model {
    pub id: String,
    pub provider: String,
    pub name: String,
    pub context_window: u32,
    pub max_output: u32,
    #[serde(rename = "input_cost_per_million")]
    pub input_cost_per_1m: f64,
    #[serde(rename = "output_cost_per_million")]
    pub output_cost_per_1m: f64,
    pub supports_vision: bool,
    pub supports_tools: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supports_thinking: bool,
}

impl Model {
    /// Dollar cost of the given usage at this model's rates.
    pub fn cost(&self, usage: &Usage) -> f64 {
        let input = usage.input_tokens as f64 * self.input_cost_per_1m / 1_000_000.0;
        let output = usage.output_tokens as f64 * self.output_cost_per_1m / 1_000_000.0;
        input + output
    }
}

/// Tool definition advertised to the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters, carried opaquely
    pub parameters: Value,
}

/// Context for an LLM request: system framing plus prior messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

/// Options for a streaming LLM request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Envelope adding a stable id and creation time to a message.
///
/// The unit of history: ids are unique and monotonic within a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message: Message,
    pub id: String,
    pub created_at: i64,
}

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocate the next message id with the given prefix.
pub fn next_message_id(prefix: &str) -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{seq}")
}

impl AgentMessage {
    /// Wrap a message with a freshly allocated id.
    pub fn new(prefix: &str, message: Message) -> Self {
        Self {
            message,
            id: next_message_id(prefix),
            created_at: now_millis(),
        }
    }

    /// Wrap a user prompt.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new("msg", Message::User(UserMessage::text(text)))
    }
}

#[cfg(test)]
mod tests;
