//! Agent lifecycle events
//!
//! These events form the observable surface of a run: the terminal UI, the
//! RPC server and any logging sink all subscribe to the same bus and receive
//! the same variants.

use crate::permission::PermissionRequest;
use crate::stream::LlmEvent;
use crate::types::{AgentMessage, ToolResultMessage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Events emitted during agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent run started
    AgentStart,

    /// Agent run ended; carries the full history snapshot
    AgentEnd { messages: Vec<AgentMessage> },

    /// New turn started
    TurnStart,

    /// Turn completed
    TurnEnd {
        message: AgentMessage,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_results: Vec<ToolResultMessage>,
    },

    /// Streaming cursor updated mid-turn
    MessageUpdate {
        message: AgentMessage,
        event: LlmEvent,
    },

    /// A prompt was appended to history
    PromptAdded { message: AgentMessage },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: Map<String, Value>,
    },

    /// Tool execution ended
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: Value,
        is_error: bool,
    },

    /// A tool needs user permission
    PermissionRequest { request: PermissionRequest },

    /// An error occurred
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        context: String,
    },

    /// Context compaction started
    CompactionStart {
        message_count: usize,
        token_count: usize,
    },

    /// Context compaction ended
    CompactionEnd {
        message_count: usize,
        token_count: usize,
    },
}

/// Canonical serialized event kind, used as the RPC event discriminator.
pub fn agent_event_type(event: &AgentEvent) -> &'static str {
    match event {
        AgentEvent::AgentStart => "agent_start",
        AgentEvent::AgentEnd { .. } => "agent_end",
        AgentEvent::TurnStart => "turn_start",
        AgentEvent::TurnEnd { .. } => "turn_end",
        AgentEvent::MessageUpdate { .. } => "message_update",
        AgentEvent::PromptAdded { .. } => "prompt_added",
        AgentEvent::ToolExecutionStart { .. } => "tool_call",
        AgentEvent::ToolExecutionEnd { .. } => "tool_result",
        AgentEvent::PermissionRequest { .. } => "permission_request",
        AgentEvent::Error { .. } => "error",
        AgentEvent::CompactionStart { .. } => "compaction_start",
        AgentEvent::CompactionEnd { .. } => "compaction_end",
    }
}
