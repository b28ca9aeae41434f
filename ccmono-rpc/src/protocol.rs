//! RPC wire types
//!
//! One JSON value per line. Client lines are commands; server lines are
//! either responses (keyed to a command's `id`) or asynchronous events.

use ccmono_core::{AgentMessage, Model, ThinkingLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recognized command type strings.
pub mod command {
    pub const PROMPT: &str = "prompt";
    pub const STEER: &str = "steer";
    pub const FOLLOW_UP: &str = "follow_up";
    pub const ABORT: &str = "abort";
    pub const NEW_SESSION: &str = "new_session";
    pub const GET_STATE: &str = "get_state";
    pub const SET_MODEL: &str = "set_model";
    pub const CYCLE_MODEL: &str = "cycle_model";
    pub const SET_THINKING_LEVEL: &str = "set_thinking_level";
    pub const CYCLE_THINKING_LEVEL: &str = "cycle_thinking_level";
    pub const GET_AVAILABLE_MODELS: &str = "get_available_models";
    pub const BASH: &str = "bash";
    pub const ABORT_BASH: &str = "abort_bash";
    pub const GET_SESSION_STATS: &str = "get_session_stats";
    pub const GET_MESSAGES: &str = "get_messages";

    /// Synthetic command name echoed for unparseable lines.
    pub const INVALID_JSON: &str = "invalid_json";
}

/// A command from the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcCommand {
    /// Client-chosen id used to pair the response.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    /// Message for prompt / steer / follow_up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional inline images for prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<RpcImage>>,
    /// Provider for set_model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model id for set_model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Thinking level for set_thinking_level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Shell command for bash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Base64 image payload attached to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcImage {
    pub data: String,
    pub mime_type: String,
}

/// A response to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    /// Echo of the command type.
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn success(id: impl Into<String>, command: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            response_type: "response".to_string(),
            command: command.into(),
            success: true,
            data,
            error: None,
        }
    }

    pub fn error(
        id: impl Into<String>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            response_type: "response".to_string(),
            command: command.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A server-initiated event line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcEvent {
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Snapshot returned by get_state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSessionState {
    pub system_prompt: String,
    pub model: Model,
    pub thinking_level: ThinkingLevel,
    pub messages: Vec<AgentMessage>,
}

/// Entry returned by get_available_models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub id: String,
    pub name: String,
    pub context_window: u32,
    pub max_output: u32,
}

/// Result of the direct bash command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BashResult {
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stats returned by get_session_stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub message_count: usize,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_roundtrip() {
        let json = r#"{"id":"req-1","type":"prompt","message":"hello"}"#;
        let cmd: RpcCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.id, "req-1");
        assert_eq!(cmd.command_type, command::PROMPT);
        assert_eq!(cmd.message.as_deref(), Some("hello"));

        let serialized = serde_json::to_string(&cmd).unwrap();
        let again: RpcCommand = serde_json::from_str(&serialized).unwrap();
        assert_eq!(again.command_type, command::PROMPT);
    }

    #[test]
    fn command_id_defaults_to_empty() {
        let cmd: RpcCommand = serde_json::from_str(r#"{"type":"abort"}"#).unwrap();
        assert_eq!(cmd.id, "");
        assert_eq!(cmd.command_type, command::ABORT);
    }

    #[test]
    fn command_with_images() {
        let json = r#"{"id":"1","type":"prompt","message":"look",
            "images":[{"data":"aGk=","mime_type":"image/png"}]}"#;
        let cmd: RpcCommand = serde_json::from_str(json).unwrap();
        let images = cmd.images.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/png");
    }

    #[test]
    fn response_shapes() {
        let ok = RpcResponse::success("1", command::STEER, None);
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["command"], "steer");
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());

        let err = RpcResponse::error("", command::INVALID_JSON, "Invalid JSON: oops");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["id"], "");
        assert_eq!(value["success"], false);
        assert_eq!(value["command"], "invalid_json");
    }

    #[test]
    fn event_timestamp_is_rfc3339() {
        let event = RpcEvent::new("turn_start", None);
        let value = serde_json::to_value(&event).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
