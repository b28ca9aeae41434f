//! The agent loop
//!
//! Drives turns against the provider, republishes stream progress on the
//! event bus, dispatches tool calls concurrently (each gated by the
//! permission manager), and interleaves steering and follow-up prompts.

use crate::agent::{build_context, build_stream_options, Agent, AgentContext};
use crate::error::{AgentError, PermissionError, ToolError};
use crate::event::AgentEvent;
use crate::permission::PermissionRequest;
use crate::stream::{AssistantEventStream, LlmEvent};
use crate::types::{
    AgentMessage, AssistantMessage, Content, Message, StopReason, ToolCall, ToolResultMessage,
    Usage,
};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Hard cap on turns per run.
    pub max_turns: u32,
    /// Hard cap on tool calls per turn.
    pub max_tool_calls: usize,
    /// Whether steering messages may interrupt a streaming turn.
    pub enable_steering: bool,
    /// Whether to compact history when it approaches the context window.
    pub enable_compaction: bool,
    /// Fraction of the usable context window that triggers compaction.
    pub compaction_ratio: f64,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 100,
            max_tool_calls: 50,
            enable_steering: true,
            enable_compaction: false,
            compaction_ratio: 0.8,
        }
    }
}

/// Publishes `AgentEnd` with a final history snapshot on every exit path.
struct EndGuard<'a> {
    agent: &'a Agent,
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        self.agent.bus().publish(AgentEvent::AgentEnd {
            messages: self.agent.state().messages(),
        });
    }
}

/// Clears the streaming flag (and with it the cursor) on every exit path.
struct StreamingGuard<'a> {
    agent: &'a Agent,
}

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.agent.state().set_streaming(false);
    }
}

/// Run the agent loop until no work remains, a limit is hit, or the context
/// is cancelled.
pub async fn agent_loop(
    cancel: CancellationToken,
    agent: &Agent,
    prompts: Vec<AgentMessage>,
    ctx: &AgentContext,
    config: &AgentLoopConfig,
) -> Result<(), AgentError> {
    let bus = agent.bus();
    let state = agent.state();

    bus.publish(AgentEvent::AgentStart);
    let _end = EndGuard { agent };

    for prompt in prompts {
        state.add_message(prompt.clone());
        bus.publish(AgentEvent::PromptAdded { message: prompt });
    }

    let mut turn_count: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if turn_count >= config.max_turns {
            let err = AgentError::ExceededTurns(config.max_turns);
            bus.publish(AgentEvent::Error {
                error: err.to_string(),
                context: "loop".to_string(),
            });
            return Err(err);
        }
        turn_count += 1;

        bus.publish(AgentEvent::TurnStart);

        if config.enable_compaction {
            maybe_compact(&cancel, agent, config).await;
        }

        let snapshot = state.messages();
        let context = build_context(state, &snapshot);
        let options = build_stream_options(state);
        let model = state.model();
        let stream = agent
            .provider()
            .stream(cancel.child_token(), &model, context, options);

        let (assistant_message, tool_results) =
            match process_stream(&cancel, stream, agent, ctx, config).await {
                Ok(outcome) => outcome,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(err) => {
                    state.set_error(err.to_string());
                    bus.publish(AgentEvent::Error {
                        error: err.to_string(),
                        context: "stream".to_string(),
                    });
                    return Err(err);
                }
            };

        state.add_message(assistant_message.clone());
        for result in &tool_results {
            state.add_message(AgentMessage::new(
                "tool",
                Message::ToolResult(result.clone()),
            ));
        }

        bus.publish(AgentEvent::TurnEnd {
            message: assistant_message,
            tool_results: tool_results.clone(),
        });

        let mut should_continue = false;

        // A steering message that interrupted the stream becomes the next
        // turn's user prompt.
        while let Some(message) = ctx.steering.pop() {
            state.add_message(message.clone());
            bus.publish(AgentEvent::PromptAdded { message });
            should_continue = true;
        }

        while let Some(message) = ctx.follow_up.pop() {
            state.add_message(message.clone());
            bus.publish(AgentEvent::PromptAdded { message });
            should_continue = true;
        }

        if !tool_results.is_empty() {
            should_continue = true;
        }

        if !should_continue {
            break;
        }
    }

    Ok(())
}

/// Consume the stream into a completed assistant message plus tool results.
async fn process_stream(
    cancel: &CancellationToken,
    mut stream: AssistantEventStream,
    agent: &Agent,
    ctx: &AgentContext,
    config: &AgentLoopConfig,
) -> Result<(AgentMessage, Vec<ToolResultMessage>), AgentError> {
    let state = agent.state();
    let bus = agent.bus();

    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = Usage::default();
    let mut interrupted = false;

    state.set_streaming(true);
    let _streaming = StreamingGuard { agent };

    while let Some(event) = stream.recv().await {
        if config.enable_steering && !ctx.steering.is_empty() {
            stream.close();
            interrupted = true;
            break;
        }

        match &event {
            LlmEvent::Start => {}
            LlmEvent::TextDelta { delta } => {
                text.push_str(delta);
                let cursor = streaming_cursor(agent, &text, &thinking, usage);
                state.set_stream_message(cursor.clone());
                bus.publish(AgentEvent::MessageUpdate {
                    message: cursor,
                    event: event.clone(),
                });
            }
            LlmEvent::ThinkingDelta { delta } => {
                thinking.push_str(delta);
                let cursor = streaming_cursor(agent, &text, &thinking, usage);
                state.set_stream_message(cursor.clone());
                bus.publish(AgentEvent::MessageUpdate {
                    message: cursor,
                    event: event.clone(),
                });
            }
            LlmEvent::ToolCall(call) => {
                // Rare: only adapters that can attest complete arguments
                // emit these mid-stream.
                state.add_pending_tool_call(&call.id);
                tool_calls.push(call.clone());
            }
            LlmEvent::Usage(update) => {
                usage = *update;
            }
            LlmEvent::End { .. } => {}
            LlmEvent::Error { error } => {
                return Err(AgentError::Stream(error.clone()));
            }
        }
    }

    if let Some(error) = stream.error() {
        return Err(AgentError::Stream(error));
    }

    let result = match stream.result().await {
        Ok(message) => message,
        Err(_) if interrupted => {
            // Steering closed the stream before the terminal result; keep
            // what was streamed as the partial assistant message. Any
            // mid-stream tool calls will never dispatch, so their pending
            // entries go too.
            for call in &tool_calls {
                state.remove_pending_tool_call(&call.id);
            }
            let mut content = Vec::new();
            if !thinking.is_empty() {
                content.push(Content::thinking(thinking));
            }
            if !text.is_empty() {
                content.push(Content::text(text));
            }
            let model = state.model();
            let partial =
                AssistantMessage::new(content, model.provider, model.id, usage, StopReason::EndTurn);
            return Ok((AgentMessage::new("msg", Message::Assistant(partial)), vec![]));
        }
        Err(crate::stream::StreamError::Cancelled) => return Err(AgentError::Cancelled),
        Err(err) => return Err(AgentError::Stream(err.to_string())),
    };

    // Tool calls in the terminal result supersede event-derived ones: the
    // adapter parses reassembled arguments exactly once, at stream end.
    let final_calls: Vec<ToolCall> = result.tool_calls().cloned().collect();
    if !final_calls.is_empty() {
        for call in &final_calls {
            state.add_pending_tool_call(&call.id);
        }
        tool_calls = final_calls;
    }

    let assistant_message = AgentMessage::new("msg", Message::Assistant(result));

    let tool_results = if tool_calls.is_empty() {
        Vec::new()
    } else {
        execute_tool_calls(cancel, tool_calls, agent, ctx, config).await?
    };

    Ok((assistant_message, tool_results))
}

fn streaming_cursor(agent: &Agent, text: &str, thinking: &str, usage: Usage) -> AgentMessage {
    let mut content = Vec::new();
    if !thinking.is_empty() {
        content.push(Content::thinking(thinking));
    }
    if !text.is_empty() {
        content.push(Content::text(text));
    }
    let model = agent.state().model();
    AgentMessage::new(
        "stream",
        Message::Assistant(AssistantMessage::new(
            content,
            model.provider,
            model.id,
            usage,
            StopReason::EndTurn,
        )),
    )
}

/// Dispatch tool calls concurrently. Results land in dispatch order; a
/// failing call becomes an `is_error` result and never aborts its siblings.
async fn execute_tool_calls(
    cancel: &CancellationToken,
    tool_calls: Vec<ToolCall>,
    agent: &Agent,
    ctx: &AgentContext,
    config: &AgentLoopConfig,
) -> Result<Vec<ToolResultMessage>, AgentError> {
    if tool_calls.len() > config.max_tool_calls {
        return Err(AgentError::ExceededToolCalls {
            count: tool_calls.len(),
            max: config.max_tool_calls,
        });
    }

    let group = cancel.child_token();
    let tasks = tool_calls.iter().map(|call| {
        let group = group.clone();
        async move {
            let result = match execute_tool_call(group, call, agent, ctx).await {
                Ok(result) => result,
                Err(err) => ToolResultMessage::new(
                    call.id.clone(),
                    call.name.clone(),
                    vec![Content::text(format!("Error: {err}"))],
                    true,
                ),
            };
            agent.state().remove_pending_tool_call(&call.id);
            result
        }
    });

    Ok(join_all(tasks).await)
}

async fn execute_tool_call(
    cancel: CancellationToken,
    call: &ToolCall,
    agent: &Agent,
    ctx: &AgentContext,
) -> Result<ToolResultMessage, ToolError> {
    let state = agent.state();
    let bus = agent.bus();

    let tool = state
        .find_tool(&call.name)
        .ok_or_else(|| ToolError::not_found(&call.name))?;

    if let Some(permissions) = ctx.permissions() {
        let mut request = PermissionRequest::for_tool_call(call);
        match permissions.check_permission(&request) {
            crate::permission::PermissionDecision::AutoDeny => {
                return Err(ToolError::permission_denied("permission denied by policy"));
            }
            crate::permission::PermissionDecision::AutoAllow => {}
            crate::permission::PermissionDecision::MustAsk => {
                let pending = permissions.register(&mut request);
                bus.publish(AgentEvent::PermissionRequest {
                    request: request.clone(),
                });
                let response = permissions
                    .wait(&request, pending, &cancel)
                    .await
                    .map_err(|err| match err {
                        PermissionError::Timeout => {
                            ToolError::permission_denied("permission request timed out")
                        }
                        PermissionError::Cancelled => ToolError::Cancelled,
                        other => ToolError::other(other.to_string()),
                    })?;
                if !response.allowed {
                    return Err(ToolError::permission_denied("permission denied by user"));
                }
            }
        }
    }

    bus.publish(AgentEvent::ToolExecutionStart {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        args: call.params.clone(),
    });

    let on_update = |_update: crate::tool::ToolUpdate| {
        // Progress updates are not surfaced yet.
    };

    let outcome = tool
        .execute(cancel, &call.id, &call.params, &on_update)
        .await;

    match outcome {
        Ok(output) => {
            bus.publish(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: serde_json::json!({
                    "content": output.content,
                    "details": output.details,
                }),
                is_error: output.is_error,
            });

            let mut message = ToolResultMessage::new(
                call.id.clone(),
                call.name.clone(),
                output.content,
                output.is_error,
            );
            message.details = output.details;
            Ok(message)
        }
        Err(err) => {
            bus.publish(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: serde_json::Value::Null,
                is_error: true,
            });
            Err(err)
        }
    }
}

/// Compact history when it approaches the context window. Failure is
/// non-fatal: the turn proceeds with uncompacted history.
async fn maybe_compact(cancel: &CancellationToken, agent: &Agent, config: &AgentLoopConfig) {
    use crate::compact::{CompactionConfig, Compactor};

    let state = agent.state();
    let model = state.model();
    let compactor = Compactor::new(
        agent.provider().clone(),
        CompactionConfig {
            context_window: model.context_window as usize,
            ..CompactionConfig::default()
        },
    );

    let messages = state.messages();
    if !compactor.needs_compaction(&messages, config.compaction_ratio) {
        return;
    }

    let before_tokens = compactor.estimate_tokens(&messages);
    agent.bus().publish(AgentEvent::CompactionStart {
        message_count: messages.len(),
        token_count: before_tokens,
    });

    match compactor.compact(cancel.child_token(), &model, messages).await {
        Ok(compacted) => {
            let after_tokens = compactor.estimate_tokens(&compacted);
            let count = compacted.len();
            state.replace_messages(compacted);
            agent.bus().publish(AgentEvent::CompactionEnd {
                message_count: count,
                token_count: after_tokens,
            });
        }
        Err(err) => {
            tracing::warn!("compaction failed, continuing uncompacted: {err}");
        }
    }
}
