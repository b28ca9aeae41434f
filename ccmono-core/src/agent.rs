//! Agent and its concurrency-safe state container
//!
//! `AgentState` is read by the UI render loop, the RPC server and concurrent
//! tool tasks while the agent loop writes it. Every accessor returns a copy;
//! the single-writer discipline is by convention, not type.

use crate::bus::EventBus;
use crate::error::AgentError;
use crate::permission::PermissionManager;
use crate::provider::Provider;
use crate::queue::MessageQueue;
use crate::run::{agent_loop, AgentLoopConfig};
use crate::tool::AgentTool;
use crate::types::{
    AgentMessage, LlmContext, Message, Model, StreamOptions, ThinkingLevel, ToolDef, Usage,
};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

struct StateInner {
    system_prompt: String,
    model: Model,
    thinking_level: ThinkingLevel,
    tools: Vec<Arc<dyn AgentTool>>,
    messages: Vec<AgentMessage>,
    is_streaming: bool,
    stream_message: Option<AgentMessage>,
    pending_tool_calls: HashSet<String>,
    error: String,
}

/// Lock-protected agent state. History is append-only within a turn;
/// truncation replaces the whole slice atomically.
pub struct AgentState {
    inner: RwLock<StateInner>,
}

impl AgentState {
    pub fn new(system_prompt: String, model: Model, tools: Vec<Arc<dyn AgentTool>>) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                system_prompt,
                model,
                thinking_level: ThinkingLevel::None,
                tools,
                messages: Vec::new(),
                is_streaming: false,
                stream_message: None,
                pending_tool_calls: HashSet::new(),
                error: String::new(),
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StateInner> {
        self.inner.read().expect("agent state lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StateInner> {
        self.inner.write().expect("agent state lock")
    }

    pub fn system_prompt(&self) -> String {
        self.read().system_prompt.clone()
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        self.write().system_prompt = prompt.into();
    }

    pub fn model(&self) -> Model {
        self.read().model.clone()
    }

    pub fn set_model(&self, model: Model) {
        self.write().model = model;
    }

    pub fn thinking_level(&self) -> ThinkingLevel {
        self.read().thinking_level
    }

    pub fn set_thinking_level(&self, level: ThinkingLevel) {
        self.write().thinking_level = level;
    }

    pub fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        self.read().tools.clone()
    }

    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.read().tools.iter().map(|t| t.definition()).collect()
    }

    pub fn add_tool(&self, tool: Arc<dyn AgentTool>) {
        self.write().tools.push(tool);
    }

    /// Look up a tool by exact name.
    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.read()
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }

    pub fn messages(&self) -> Vec<AgentMessage> {
        self.read().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    pub fn add_message(&self, message: AgentMessage) {
        self.write().messages.push(message);
    }

    /// Replace the whole history atomically (compaction, regeneration).
    pub fn replace_messages(&self, messages: Vec<AgentMessage>) {
        self.write().messages = messages;
    }

    /// Remove the last User message and everything after it, returning it so
    /// the caller can restart the loop with it as the single prompt.
    pub fn take_regeneration_prompt(&self) -> Option<AgentMessage> {
        let mut inner = self.write();
        let index = inner
            .messages
            .iter()
            .rposition(|m| matches!(m.message, Message::User(_)))?;
        let prompt = inner.messages[index].clone();
        inner.messages.truncate(index);
        Some(prompt)
    }

    /// Sum of token usage across assistant messages.
    pub fn total_usage(&self) -> Usage {
        let inner = self.read();
        let mut total = Usage::default();
        for msg in &inner.messages {
            if let Message::Assistant(a) = &msg.message {
                total.add(&a.usage);
            }
        }
        total
    }

    pub fn is_streaming(&self) -> bool {
        self.read().is_streaming
    }

    /// Toggle streaming. Leaving streaming clears the cursor: it is
    /// non-empty iff a stream is in flight.
    pub fn set_streaming(&self, streaming: bool) {
        let mut inner = self.write();
        inner.is_streaming = streaming;
        if !streaming {
            inner.stream_message = None;
        }
    }

    pub fn stream_message(&self) -> Option<AgentMessage> {
        self.read().stream_message.clone()
    }

    pub fn set_stream_message(&self, message: AgentMessage) {
        self.write().stream_message = Some(message);
    }

    pub fn add_pending_tool_call(&self, tool_call_id: impl Into<String>) {
        self.write().pending_tool_calls.insert(tool_call_id.into());
    }

    pub fn remove_pending_tool_call(&self, tool_call_id: &str) {
        self.write().pending_tool_calls.remove(tool_call_id);
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        !self.read().pending_tool_calls.is_empty()
    }

    pub fn pending_tool_calls(&self) -> Vec<String> {
        self.read().pending_tool_calls.iter().cloned().collect()
    }

    pub fn error(&self) -> String {
        self.read().error.clone()
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.write().error = error.into();
    }

    pub fn clear_error(&self) {
        self.write().error.clear();
    }
}

/// Build the LLM request context from a history snapshot.
pub fn build_context(state: &AgentState, messages: &[AgentMessage]) -> LlmContext {
    LlmContext {
        system_prompt: state.system_prompt(),
        messages: messages.iter().map(|m| m.message.clone()).collect(),
    }
}

/// Build stream options from the state's tool table and thinking level.
pub fn build_stream_options(state: &AgentState) -> StreamOptions {
    StreamOptions {
        tools: state.tool_defs(),
        thinking_level: state.thinking_level(),
        temperature: None,
        max_tokens: None,
    }
}

/// Per-run context: the prompt queues and optional collaborators bound to
/// the loop.
#[derive(Default)]
pub struct AgentContext {
    /// Messages that preempt the current turn.
    pub steering: MessageQueue,
    /// Messages queued for the next turn.
    pub follow_up: MessageQueue,
    permissions: Option<Arc<PermissionManager>>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn permissions(&self) -> Option<&Arc<PermissionManager>> {
        self.permissions.as_ref()
    }

    pub fn add_steering_message(&self, message: AgentMessage) {
        self.steering.push(message);
    }

    pub fn add_follow_up_message(&self, message: AgentMessage) {
        self.follow_up.push(message);
    }
}

/// An AI agent: state, provider and event bus.
pub struct Agent {
    state: Arc<AgentState>,
    provider: Arc<dyn Provider>,
    bus: Arc<EventBus>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        system_prompt: impl Into<String>,
        model: Model,
        tools: Vec<Arc<dyn AgentTool>>,
    ) -> Self {
        Self {
            state: Arc::new(AgentState::new(system_prompt.into(), model, tools)),
            provider,
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run the loop with default configuration.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        prompts: Vec<AgentMessage>,
        ctx: &AgentContext,
    ) -> Result<(), AgentError> {
        self.run_with_config(cancel, prompts, ctx, &AgentLoopConfig::default())
            .await
    }

    /// Run the loop with explicit configuration.
    pub async fn run_with_config(
        &self,
        cancel: CancellationToken,
        prompts: Vec<AgentMessage>,
        ctx: &AgentContext,
        config: &AgentLoopConfig,
    ) -> Result<(), AgentError> {
        agent_loop(cancel, self, prompts, ctx, config).await
    }

    /// Truncate history after the last user message and re-run it.
    pub async fn regenerate(
        &self,
        cancel: CancellationToken,
        ctx: &AgentContext,
        config: &AgentLoopConfig,
    ) -> Result<(), AgentError> {
        let Some(prompt) = self.state.take_regeneration_prompt() else {
            return Ok(());
        };
        self.run_with_config(cancel, vec![prompt], ctx, config).await
    }

    /// Close the agent's event bus.
    pub fn close(&self) {
        self.bus.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserMessage;

    fn state() -> AgentState {
        AgentState::new("be helpful".into(), Model::default(), Vec::new())
    }

    #[test]
    fn accessors_return_copies() {
        let state = state();
        state.add_message(AgentMessage::user("one"));
        let mut snapshot = state.messages();
        snapshot.clear();
        assert_eq!(state.message_count(), 1);
    }

    #[test]
    fn leaving_streaming_clears_cursor() {
        let state = state();
        state.set_streaming(true);
        state.set_stream_message(AgentMessage::new(
            "stream",
            Message::User(UserMessage::text("partial")),
        ));
        assert!(state.stream_message().is_some());

        state.set_streaming(false);
        assert!(!state.is_streaming());
        assert!(state.stream_message().is_none());
    }

    #[test]
    fn pending_tool_calls_tracking() {
        let state = state();
        assert!(!state.has_pending_tool_calls());
        state.add_pending_tool_call("c1");
        state.add_pending_tool_call("c2");
        assert!(state.has_pending_tool_calls());
        state.remove_pending_tool_call("c1");
        state.remove_pending_tool_call("c2");
        assert!(!state.has_pending_tool_calls());
    }

    #[test]
    fn take_regeneration_prompt_truncates_from_last_user() {
        let state = state();
        state.add_message(AgentMessage::user("first"));
        state.add_message(AgentMessage::new(
            "msg",
            Message::Assistant(crate::types::AssistantMessage::new(
                vec![crate::types::Content::text("answer")],
                "mock",
                "m",
                Usage::default(),
                crate::types::StopReason::EndTurn,
            )),
        ));
        state.add_message(AgentMessage::user("second"));
        state.add_message(AgentMessage::new(
            "msg",
            Message::Assistant(crate::types::AssistantMessage::new(
                vec![crate::types::Content::text("answer 2")],
                "mock",
                "m",
                Usage::default(),
                crate::types::StopReason::EndTurn,
            )),
        ));

        let prompt = state.take_regeneration_prompt().unwrap();
        assert_eq!(
            crate::types::extract_text(prompt.message.content()),
            "second"
        );
        assert_eq!(state.message_count(), 2);
    }

    #[test]
    fn total_usage_sums_assistant_turns() {
        let state = state();
        for tokens in [10u64, 20] {
            state.add_message(AgentMessage::new(
                "msg",
                Message::Assistant(crate::types::AssistantMessage::new(
                    vec![],
                    "mock",
                    "m",
                    Usage::new(tokens, tokens / 2),
                    crate::types::StopReason::EndTurn,
                )),
            ));
        }
        let total = state.total_usage();
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 15);
    }
}
