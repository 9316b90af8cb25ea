//! Arawn — launcher for the orchestrator core's reference HTTP adapter.
//!
//! No concrete LLM backend ships in this workspace (`arawn-llm` is
//! deliberately vendor-agnostic); `serve` wires the bundled `MockOracle` so
//! the server can be brought up end to end against a real MCP server fleet.
//! A production deployment would swap in a `BackendOracle` over a real
//! `LlmBackend` impl.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use arawn_config::CoreConfig;
use arawn_mcp::PoolManager;
use arawn_orchestrator::{MockOracle, OrchestratorContext};
use arawn_server::{Server, ServerConfig};
use arawn_session::{SessionConfig, SessionStore};

#[derive(Parser)]
#[command(name = "arawn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the reference HTTP/SSE adapter.
    Serve(ServeArgs),
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Path to a TOML config file (see `arawn_config::CoreConfig`).
    #[arg(long, env = "ARAWN_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Bind address for the HTTP adapter.
    #[arg(long, default_value = "127.0.0.1:8080", env = "ARAWN_BIND_ADDRESS")]
    pub bind: String,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "arawn=debug,arawn_orchestrator=debug,arawn_mcp=debug,arawn_session=debug,arawn_server=debug,info"
    } else {
        "arawn=info,arawn_orchestrator=info,arawn_mcp=info,arawn_session=info,arawn_server=info,warn"
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let core_config = CoreConfig::load(args.config.as_deref())?;

    let session_config = SessionConfig::new()
        .with_idle_ttl(std::time::Duration::from_secs(core_config.session_idle_ttl_seconds))
        .with_context_budget_chars(core_config.context_budget_chars);
    let sessions = Arc::new(SessionStore::new(session_config));
    if let Some(handle) = sessions.clone().spawn_sweeper() {
        drop(handle);
    }

    let pools = Arc::new(PoolManager::new(core_config.pool_size));
    let oracle = Arc::new(MockOracle::with_text(
        "no concrete LLM backend is configured; replace MockOracle with a BackendOracle",
    ));

    let orchestrator = Arc::new(
        OrchestratorContext::new(sessions, pools, oracle, core_config.servers.clone())
            .with_pool_acquire_deadline(std::time::Duration::from_secs_f64(
                core_config.pool_max_wait_seconds,
            ))
            .with_tool_call_timeout(std::time::Duration::from_secs(
                core_config.mcp_tool_timeout_seconds,
            )),
    );

    let server_config = ServerConfig::new().with_bind_address(args.bind.parse()?);
    Server::new(orchestrator, server_config).run().await?;
    Ok(())
}
