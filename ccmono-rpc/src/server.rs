//! RPC server
//!
//! Reads newline-delimited JSON commands, dispatches each on its own task,
//! and pumps agent events to the client as they happen. A single locked
//! writer serializes responses and events so line boundaries never
//! interleave.

use crate::protocol::{
    command, BashResult, ModelInfo, RpcCommand, RpcEvent, RpcResponse, RpcSessionState,
    SessionStats,
};
use crate::transport::{LineReader, LineWriter, TransportError};
use ccmono_core::{
    agent_event_type, Agent, AgentContext, AgentLoopConfig, AgentMessage, Content, ImageSource,
    Message, ModelRegistry, ThinkingLevel, UserMessage,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Timeout for the direct bash command.
const BASH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that terminate the server loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A line-framed RPC server bound to one agent.
pub struct RpcServer<W> {
    agent: Arc<Agent>,
    registry: Arc<ModelRegistry>,
    ctx: Arc<AgentContext>,
    loop_config: AgentLoopConfig,
    writer: LineWriter<W>,
    /// Context for agent runs; replaced wholesale on abort.
    run_cancel: Mutex<CancellationToken>,
    /// Signal for the direct bash path.
    bash_cancel: Mutex<CancellationToken>,
    started_at: DateTime<Utc>,
}

impl<W: AsyncWrite + Send + Unpin + 'static> RpcServer<W> {
    pub fn new(
        agent: Arc<Agent>,
        registry: Arc<ModelRegistry>,
        ctx: Arc<AgentContext>,
        loop_config: AgentLoopConfig,
        writer: W,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent,
            registry,
            ctx,
            loop_config,
            writer: LineWriter::new(writer),
            run_cancel: Mutex::new(CancellationToken::new()),
            bash_cancel: Mutex::new(CancellationToken::new()),
            started_at: Utc::now(),
        })
    }

    /// Run until EOF or a fatal I/O error. Parse errors are reported to the
    /// client and do not terminate the loop.
    pub async fn run<R: AsyncBufRead + Unpin>(
        self: &Arc<Self>,
        reader: R,
    ) -> Result<(), ServerError> {
        self.spawn_event_pump();

        let mut reader = LineReader::new(reader);
        loop {
            match reader.read_command().await {
                Ok(Some(cmd)) => {
                    let server = Arc::clone(self);
                    tokio::spawn(async move {
                        server.handle_command(cmd).await;
                    });
                }
                Ok(None) => break,
                Err(TransportError::Parse(err)) => {
                    self.send(RpcResponse::error(
                        "",
                        command::INVALID_JSON,
                        format!("Invalid JSON: {err}"),
                    ))
                    .await;
                }
                Err(TransportError::Io(err)) => return Err(ServerError::Io(err)),
            }
        }
        Ok(())
    }

    /// Forward agent events to the client as RPC event lines.
    fn spawn_event_pump(self: &Arc<Self>) {
        let mut events = self.agent.bus().subscribe(100);
        let writer = self.writer.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let kind = agent_event_type(&event);
                let data = serde_json::to_value(&event).ok();
                if writer.write_json(&RpcEvent::new(kind, data)).await.is_err() {
                    return;
                }
            }
        });
    }

    async fn send(&self, response: RpcResponse) {
        if let Err(err) = self.writer.write_json(&response).await {
            tracing::warn!("failed to write RPC response: {err}");
        }
    }

    async fn send_success(&self, cmd: &RpcCommand, data: Option<serde_json::Value>) {
        self.send(RpcResponse::success(&cmd.id, &cmd.command_type, data))
            .await;
    }

    async fn send_error(&self, cmd: &RpcCommand, error: impl Into<String>) {
        self.send(RpcResponse::error(&cmd.id, &cmd.command_type, error))
            .await;
    }

    async fn handle_command(self: Arc<Self>, cmd: RpcCommand) {
        match cmd.command_type.as_str() {
            command::PROMPT => self.handle_prompt(cmd).await,
            command::STEER => self.handle_steer(cmd).await,
            command::FOLLOW_UP => self.handle_follow_up(cmd).await,
            command::ABORT => self.handle_abort(cmd).await,
            command::NEW_SESSION => self.handle_new_session(cmd).await,
            command::GET_STATE => self.handle_get_state(cmd).await,
            command::SET_MODEL => self.handle_set_model(cmd).await,
            command::CYCLE_MODEL => self.handle_cycle_model(cmd).await,
            command::SET_THINKING_LEVEL => self.handle_set_thinking_level(cmd).await,
            command::CYCLE_THINKING_LEVEL => self.handle_cycle_thinking_level(cmd).await,
            command::GET_AVAILABLE_MODELS => self.handle_get_available_models(cmd).await,
            command::BASH => self.handle_bash(cmd).await,
            command::ABORT_BASH => self.handle_abort_bash(cmd).await,
            command::GET_MESSAGES => self.handle_get_messages(cmd).await,
            command::GET_SESSION_STATS => self.handle_get_session_stats(cmd).await,
            other => {
                let message = format!("Unknown command: {other}");
                self.send_error(&cmd, message).await;
            }
        }
    }

    fn user_message(cmd: &RpcCommand, prefix: &str) -> Option<AgentMessage> {
        let text = cmd.message.clone()?;
        let mut content = vec![Content::text(text)];
        if let Some(images) = &cmd.images {
            for image in images {
                content.push(Content::Image {
                    source: ImageSource::base64(&image.data, &image.mime_type),
                });
            }
        }
        Some(AgentMessage::new(
            prefix,
            Message::User(UserMessage::new(content)),
        ))
    }

    async fn handle_prompt(self: Arc<Self>, cmd: RpcCommand) {
        let Some(message) = Self::user_message(&cmd, "msg") else {
            self.send_error(&cmd, "Message is required").await;
            return;
        };

        let cancel = self.run_cancel.lock().expect("run cancel lock").clone();
        let server = Arc::clone(&self);
        tokio::spawn(async move {
            let outcome = server
                .agent
                .run_with_config(cancel, vec![message], &server.ctx, &server.loop_config)
                .await;
            match outcome {
                Ok(()) => server.send_success(&cmd, None).await,
                Err(err) => server.send_error(&cmd, format!("Prompt failed: {err}")).await,
            }
        });
    }

    async fn handle_steer(self: Arc<Self>, cmd: RpcCommand) {
        let Some(message) = Self::user_message(&cmd, "steer") else {
            self.send_error(&cmd, "Message is required").await;
            return;
        };
        self.ctx.add_steering_message(message);
        self.send_success(&cmd, None).await;
    }

    async fn handle_follow_up(self: Arc<Self>, cmd: RpcCommand) {
        let Some(message) = Self::user_message(&cmd, "followup") else {
            self.send_error(&cmd, "Message is required").await;
            return;
        };
        self.ctx.add_follow_up_message(message);
        self.send_success(&cmd, None).await;
    }

    async fn handle_abort(self: Arc<Self>, cmd: RpcCommand) {
        // Cancel the current run context and build a fresh one so later
        // commands start clean.
        let old = {
            let mut guard = self.run_cancel.lock().expect("run cancel lock");
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        old.cancel();
        self.send_success(&cmd, None).await;
    }

    async fn handle_new_session(self: Arc<Self>, cmd: RpcCommand) {
        let state = self.agent.state();
        state.replace_messages(Vec::new());
        state.clear_error();
        self.ctx.steering.clear();
        self.ctx.follow_up.clear();
        self.send_success(&cmd, Some(json!({"cancelled": false})))
            .await;
    }

    async fn handle_get_state(self: Arc<Self>, cmd: RpcCommand) {
        let state = self.agent.state();
        let snapshot = RpcSessionState {
            system_prompt: state.system_prompt(),
            model: state.model(),
            thinking_level: state.thinking_level(),
            messages: state.messages(),
        };
        match serde_json::to_value(&snapshot) {
            Ok(data) => self.send_success(&cmd, Some(data)).await,
            Err(err) => self.send_error(&cmd, err.to_string()).await,
        }
    }

    async fn handle_set_model(self: Arc<Self>, cmd: RpcCommand) {
        let (Some(provider), Some(model_id)) = (cmd.provider.clone(), cmd.model_id.clone()) else {
            self.send_error(&cmd, "Provider and model ID are required")
                .await;
            return;
        };

        match self.registry.to_model(&model_id) {
            Ok(model) => {
                self.agent.state().set_model(model);
                self.send_success(&cmd, Some(json!({"provider": provider, "id": model_id})))
                    .await;
            }
            Err(err) => {
                self.send_error(&cmd, format!("Model not found: {err}")).await;
            }
        }
    }

    async fn handle_cycle_model(self: Arc<Self>, cmd: RpcCommand) {
        let current = self.agent.state().model();
        let Some(next) = self.registry.next_after(&current.id) else {
            self.send_error(&cmd, "No models registered").await;
            return;
        };
        let id = next.id.clone();
        let provider = next.provider.clone();
        match self.registry.to_model(&id) {
            Ok(model) => {
                self.agent.state().set_model(model);
                self.send_success(&cmd, Some(json!({"provider": provider, "id": id})))
                    .await;
            }
            Err(err) => self.send_error(&cmd, err.to_string()).await,
        }
    }

    async fn handle_set_thinking_level(self: Arc<Self>, cmd: RpcCommand) {
        let Some(level) = cmd.level.as_deref() else {
            self.send_error(&cmd, "Level is required").await;
            return;
        };
        match ThinkingLevel::parse(level) {
            Some(parsed) => {
                self.agent.state().set_thinking_level(parsed);
                self.send_success(&cmd, Some(json!({"level": parsed.as_str()})))
                    .await;
            }
            None => {
                self.send_error(&cmd, format!("Unknown thinking level: {level}"))
                    .await;
            }
        }
    }

    async fn handle_cycle_thinking_level(self: Arc<Self>, cmd: RpcCommand) {
        let next = self.agent.state().thinking_level().next();
        self.agent.state().set_thinking_level(next);
        self.send_success(&cmd, Some(json!({"level": next.as_str()})))
            .await;
    }

    async fn handle_get_available_models(self: Arc<Self>, cmd: RpcCommand) {
        let models: Vec<ModelInfo> = self
            .registry
            .list()
            .into_iter()
            .map(|m| ModelInfo {
                provider: m.provider.clone(),
                id: m.id.clone(),
                name: m.name.clone(),
                context_window: m.context_window,
                max_output: m.max_output,
            })
            .collect();
        self.send_success(&cmd, Some(json!({"models": models}))).await;
    }

    /// Direct shell invocation. Bypasses the tool system and the permission
    /// manager: the RPC client is trusted. Operators who want uniform
    /// gating should route shell access through the Bash tool instead.
    async fn handle_bash(self: Arc<Self>, cmd: RpcCommand) {
        let Some(shell_command) = cmd.command.clone() else {
            self.send_error(&cmd, "Bash command is required").await;
            return;
        };

        let result = self.run_bash(&shell_command).await;
        match serde_json::to_value(&result) {
            Ok(data) => self.send_success(&cmd, Some(data)).await,
            Err(err) => self.send_error(&cmd, err.to_string()).await,
        }
    }

    async fn run_bash(&self, shell_command: &str) -> BashResult {
        let cancel = self.bash_cancel.lock().expect("bash cancel lock").clone();

        let mut command = tokio::process::Command::new("bash");
        command
            .arg("-c")
            .arg(shell_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a kill takes the children down too.
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return BashResult {
                    output: String::new(),
                    exit_code: 1,
                    error: Some(err.to_string()),
                }
            }
        };
        let pid = child.id();

        let output = child.wait_with_output();
        tokio::pin!(output);

        let failure = tokio::select! {
            result = &mut output => {
                return match result {
                    Ok(output) => {
                        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                        combined.push_str(&String::from_utf8_lossy(&output.stderr));
                        let exit_code = output.status.code().unwrap_or(1);
                        BashResult {
                            output: combined,
                            exit_code,
                            error: (!output.status.success())
                                .then(|| format!("exit status: {exit_code}")),
                        }
                    }
                    Err(err) => BashResult {
                        output: String::new(),
                        exit_code: 1,
                        error: Some(err.to_string()),
                    },
                };
            }
            _ = tokio::time::sleep(BASH_TIMEOUT) => {
                format!("command timed out after {}s", BASH_TIMEOUT.as_secs())
            }
            _ = cancel.cancelled() => "command aborted".to_string(),
        };

        // Timed out or aborted: take down the whole process group, not just
        // the shell — grandchildren share the group created at spawn.
        #[cfg(unix)]
        if let Some(pid) = pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(pid as i32);
            // SIGTERM first to allow cleanup, SIGKILL if the group lingers.
            let _ = killpg(pgid, Signal::SIGTERM);
            tokio::select! {
                _ = &mut output => {}
                _ = tokio::time::sleep(Duration::from_secs(2)) => {
                    let _ = killpg(pgid, Signal::SIGKILL);
                    let _ = (&mut output).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            // kill_on_drop takes the single child down when `output` drops.
            let _ = pid;
        }

        BashResult {
            output: String::new(),
            exit_code: 1,
            error: Some(failure),
        }
    }

    async fn handle_abort_bash(self: Arc<Self>, cmd: RpcCommand) {
        let old = {
            let mut guard = self.bash_cancel.lock().expect("bash cancel lock");
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        old.cancel();
        self.send_success(&cmd, None).await;
    }

    async fn handle_get_messages(self: Arc<Self>, cmd: RpcCommand) {
        let messages = self.agent.state().messages();
        match serde_json::to_value(&messages) {
            Ok(data) => self.send_success(&cmd, Some(json!({"messages": data}))).await,
            Err(err) => self.send_error(&cmd, err.to_string()).await,
        }
    }

    async fn handle_get_session_stats(self: Arc<Self>, cmd: RpcCommand) {
        let state = self.agent.state();
        let stats = SessionStats {
            message_count: state.message_count(),
            total_tokens: state.total_usage().total_tokens,
            created_at: self.started_at,
            updated_at: Utc::now(),
        };
        match serde_json::to_value(&stats) {
            Ok(data) => self.send_success(&cmd, Some(data)).await,
            Err(err) => self.send_error(&cmd, err.to_string()).await,
        }
    }
}

/// Serve the RPC protocol over stdin/stdout.
pub async fn serve_stdio(
    agent: Arc<Agent>,
    registry: Arc<ModelRegistry>,
    ctx: Arc<AgentContext>,
    loop_config: AgentLoopConfig,
) -> Result<(), ServerError> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let server = RpcServer::new(agent, registry, ctx, loop_config, stdout);
    server.run(tokio::io::BufReader::new(stdin)).await
}
