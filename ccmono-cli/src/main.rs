//! cc-mono - wiring shell for the agent runtime
//!
//! Loads the model registry and provider configuration from `~/.cc-mono`,
//! builds the agent, and serves the RPC protocol on stdin/stdout or over
//! HTTP/WebSocket. SIGINT/SIGTERM cancel the root context.

use anyhow::{bail, Context};
use ccmono_core::{
    Agent, AgentContext, AgentLoopConfig, ModelRegistry, PermissionManager, Provider,
    ProviderConfig, ProvidersConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;

const DEFAULT_SYSTEM_PROMPT: &str = "You are cc-mono, an AI coding agent. You help users read, \
write and modify code, and run shell commands on their behalf. Be concise and precise.";

#[derive(Parser, Debug)]
#[command(name = "cc-mono")]
#[command(about = "cc-mono agent runtime")]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.cc-mono).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override the system prompt.
    #[arg(long)]
    system_prompt: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the RPC protocol on stdin/stdout.
    Rpc,
    /// Serve the HTTP/WebSocket front-end.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8765")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(err) => {
            eprintln!("cc-mono: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Resolve the configured provider by name.
///
/// Vendor adapters live outside this workspace; downstream builds link them
/// and extend this table. With none linked, any configured provider is a
/// startup configuration error.
fn build_provider(name: &str, _config: &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> {
    bail!("no provider adapter linked for '{name}'")
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("cannot resolve home directory")?
            .join(".cc-mono"),
    };

    let mut registry = ModelRegistry::new();
    registry
        .load_from_file(config_dir.join("models.json"))
        .context("loading model registry")?;

    let providers = ProvidersConfig::load_from_file(config_dir.join("providers.json"))
        .context("loading provider configuration")?;
    let provider_name = providers
        .default_provider
        .clone()
        .context("providers.json has no default_provider")?;
    let provider_config = providers
        .get(&provider_name)
        .with_context(|| format!("provider '{provider_name}' is not configured"))?;
    let provider = build_provider(&provider_name, provider_config)?;

    let model = match provider_config.default_model.as_deref() {
        Some(id) => registry
            .to_model(id)
            .with_context(|| format!("default model '{id}' not in registry"))?,
        None => provider.default_model(),
    };
    provider
        .validate_model(&model)
        .with_context(|| format!("provider '{provider_name}' rejected model '{}'", model.id))?;

    let project_dir = std::env::current_dir().context("resolving working directory")?;
    let permissions = Arc::new(
        PermissionManager::new(&config_dir, &project_dir).context("loading permission settings")?,
    );

    let system_prompt = cli
        .system_prompt
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let agent = Arc::new(Agent::new(provider, system_prompt, model, Vec::new()));
    let ctx = Arc::new(AgentContext::new().with_permissions(permissions));
    let registry = Arc::new(registry);
    let loop_config = AgentLoopConfig::default();

    let root = CancellationToken::new();
    spawn_signal_handler(root.clone());

    match cli.command {
        Command::Rpc => {
            tokio::select! {
                served = ccmono_rpc::serve_stdio(
                    Arc::clone(&agent),
                    registry,
                    ctx,
                    loop_config,
                ) => served.context("rpc server failed")?,
                _ = root.cancelled() => {
                    tracing::info!("shutting down on signal");
                }
            }
        }
        Command::Serve { addr } => {
            let state = ccmono_rpc::HttpState {
                agent: Arc::clone(&agent),
                registry,
                ctx,
                loop_config,
            };
            tokio::select! {
                served = ccmono_rpc::serve(&addr, state) => served.context("http server failed")?,
                _ = root.cancelled() => {
                    tracing::info!("shutting down on signal");
                }
            }
        }
    }

    agent.close();
    Ok(())
}

fn spawn_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!("failed to install SIGTERM handler: {err}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        root.cancel();
    });
}
