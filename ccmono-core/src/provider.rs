//! LLM provider contract
//!
//! Vendor adapters implement [`Provider`], normalizing their wire format to
//! [`LlmEvent`]s. Chunked tool-call JSON is reassembled inside the adapter —
//! the loop only ever sees completed tool calls, either as rare mid-stream
//! events (when the adapter can attest the arguments are complete) or as
//! content of the terminal result.

use crate::error::AgentError;
use crate::stream::AssistantEventStream;
use crate::types::{LlmContext, Model, StreamOptions, ToolCall};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// An LLM provider.
pub trait Provider: Send + Sync {
    /// Provider name, e.g. "openai".
    fn name(&self) -> &str;

    /// Open a streaming request. The returned stream is bound to `cancel`;
    /// closing it unwinds the adapter's wire read.
    fn stream(
        &self,
        cancel: CancellationToken,
        model: &Model,
        context: LlmContext,
        options: StreamOptions,
    ) -> AssistantEventStream;

    /// Simplified request without tools, used for one-shot calls such as
    /// compaction summaries.
    fn stream_simple(
        &self,
        cancel: CancellationToken,
        model: &Model,
        context: LlmContext,
        mut options: StreamOptions,
    ) -> AssistantEventStream {
        options.tools.clear();
        self.stream(cancel, model, context, options)
    }

    /// Check whether this provider can serve the model.
    fn validate_model(&self, model: &Model) -> Result<(), AgentError>;

    /// The provider's default model.
    fn default_model(&self) -> Model;
}

/// Accumulates one tool call whose JSON arguments arrive in fragments.
#[derive(Debug, Clone, Default)]
pub struct ToolCallBuffer {
    pub id: String,
    pub name: Option<String>,
    pub args_json: String,
}

impl ToolCallBuffer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            args_json: String::new(),
        }
    }

    /// Append a fragment of the argument JSON.
    pub fn push_fragment(&mut self, fragment: &str) {
        self.args_json.push_str(fragment);
    }

    /// Parse the concatenated JSON into a completed call. Empty arguments
    /// become an empty object (tools with no parameters); unparseable or
    /// nameless buffers yield `None`.
    pub fn try_complete(&self) -> Option<ToolCall> {
        let name = self.name.as_ref()?;
        let params: Map<String, Value> = if self.args_json.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str(&self.args_json).ok()? {
                Value::Object(map) => map,
                _ => return None,
            }
        };
        Some(ToolCall::new(self.id.clone(), name.clone(), params))
    }
}

/// Accumulates tool calls by vendor stream index, the shape most streaming
/// APIs deliver fragments in.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    buffers: BTreeMap<usize, ToolCallBuffer>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment for the call at `index`. `id` and `name` stick on
    /// first sight.
    pub fn push(&mut self, index: usize, id: Option<&str>, name: Option<&str>, fragment: &str) {
        let buffer = self
            .buffers
            .entry(index)
            .or_insert_with(|| ToolCallBuffer::new(""));
        if buffer.id.is_empty() {
            if let Some(id) = id {
                buffer.id = id.to_string();
            }
        }
        if buffer.name.is_none() {
            if let Some(name) = name {
                buffer.name = Some(name.to_string());
            }
        }
        buffer.push_fragment(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Parse every buffer once, in index order. Incomplete buffers are
    /// dropped with a warning.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut calls = Vec::with_capacity(self.buffers.len());
        for (index, buffer) in self.buffers {
            match buffer.try_complete() {
                Some(call) => calls.push(call),
                None => {
                    tracing::warn!(index, "dropping incomplete tool call buffer");
                }
            }
        }
        calls
    }
}
