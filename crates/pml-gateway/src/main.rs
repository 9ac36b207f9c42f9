use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pml_config::GatewayConfig;
use pml_mcp::{ExecuteHandler, GatewayHandle, ServeArgs, run_serve};
use pml_orchestrator::ExecutionOrchestrator;

#[derive(Parser)]
#[command(name = "pml-gateway", version, about = "MCP gateway: discovery, routing, sandboxed orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace's `.pml/config.toml` if it doesn't already exist.
    Init {
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Start the gateway.
    Serve {
        #[arg(long, default_value = ".pml/config.toml")]
        config: PathBuf,
        #[arg(long)]
        port: Option<u16>,
        /// Skip eagerly warming the tool-route cache at startup.
        #[arg(long)]
        no_speculative: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { workspace } => {
            init_workspace(&workspace)?;
            Ok(())
        }
        Commands::Serve { config, port, no_speculative } => {
            let args = ServeArgs { config, port, no_speculative };
            match run_serve(args, make_execute_handler).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    tracing::error!(error = %error, "gateway exited with an error");
                    std::process::exit(error.exit_code());
                }
            }
        }
    }
}

fn init_workspace(workspace: &std::path::Path) -> Result<()> {
    let path = pml_config::paths::workspace_config_path(workspace);
    if path.exists() {
        println!("{} already exists", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let config = GatewayConfig::default();
    std::fs::write(&path, toml::to_string_pretty(&config)?)?;
    println!("wrote {}", path.display());
    Ok(())
}

/// Builds the `pml:execute` handler: an [`ExecutionOrchestrator`] wired to a
/// [`GatewayHandle`] over this gateway's own configured servers.
fn make_execute_handler(
    gateway: Arc<GatewayHandle>,
    config: &GatewayConfig,
) -> Option<Arc<dyn ExecuteHandler>> {
    match ExecutionOrchestrator::new(Some(gateway), config.permissions.clone(), config.workspace.clone()) {
        Ok(orchestrator) => Some(Arc::new(orchestrator)),
        Err(error) => {
            tracing::warn!(error = %error, "failed to wire pml:execute, serving as a plain tool proxy");
            None
        }
    }
}
