//! ccmono-core - Runtime core of the cc-mono coding agent
//!
//! This crate contains the agent loop, the event bus, the LLM stream
//! abstraction, the permission subsystem and the tool/extension contracts.
//! It performs no network I/O: LLM vendors plug in through [`Provider`],
//! tool bodies through [`AgentTool`], and observers through the event bus.

pub mod agent;
pub mod bus;
pub mod compact;
pub mod error;
pub mod event;
pub mod permission;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod run;
pub mod stream;
pub mod tool;
pub mod types;

pub use agent::{build_context, build_stream_options, Agent, AgentContext, AgentState};
pub use bus::{EventBus, DEFAULT_SUBSCRIBER_BUFFER};
pub use compact::{CompactionConfig, Compactor};
pub use error::{AgentError, PermissionError, ToolError};
pub use event::{agent_event_type, AgentEvent};
pub use permission::{
    analyze_risk, describe_tool_call, extract_resource, generate_pattern, match_pattern,
    PendingPermission, PermissionDecision, PermissionManager, PermissionRequest,
    PermissionResponse, PermissionScope, PermissionSettings, RiskLevel, Settings,
    DEFAULT_PROMPT_TIMEOUT,
};
pub use provider::{Provider, ToolCallAccumulator, ToolCallBuffer};
pub use queue::MessageQueue;
pub use registry::{ModelConfig, ModelRegistry, ProviderConfig, ProvidersConfig};
pub use run::{agent_loop, AgentLoopConfig};
pub use stream::{
    assistant_channel, AssistantEventStream, AssistantStreamSender, EventStream, LlmEvent,
    StreamError, StreamSender, DEFAULT_STREAM_BUFFER,
};
pub use tool::{
    wrap_tools, AgentTool, Extension, ExtensionRegistry, HookedTool, ToolOutput, ToolUpdate,
    ToolUpdateFn,
};
pub use types::{
    extract_text, next_message_id, now_millis, AgentMessage, AssistantMessage, Content,
    ImageSource, LlmContext, Message, Model, StopReason, StreamOptions, ThinkingLevel, ToolCall,
    ToolDef, ToolResultMessage, Usage, UserMessage,
};
