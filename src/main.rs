mod agent;
mod cmd_config;
mod config;
mod error;
mod protocol;
mod resources;
mod runtime;
mod schema;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::{DELAY_KEY, PingAgent};
use crate::resources::Manifest;
use crate::runtime::local::LocalRuntime;
use crate::runtime::pong::{self, PongPeer};

#[derive(Parser)]
#[command(name = "agent-ping", about = "Ping agent for the distributed test harness", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and start pinging agent-pong until interrupted
    Start {
        /// The delay for pinging, in milliseconds [default: 1000]
        #[arg(long, allow_negative_numbers = true)]
        delay: Option<i32>,
    },
    /// Print the agent manifest
    Manifest,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create a default settings.json
    Init,
    /// Show the effective configuration
    Show,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    let delay = match cli.command {
        Commands::Config { action } => return cmd_config::run(&action, &config_path),
        Commands::Manifest => {
            let config = config::AppConfig::load_or_default(&config_path)?;
            let manifest = Manifest::load(config.resource_loader().as_ref())?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            return Ok(());
        }
        Commands::Start { delay } => delay,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .init();

    let config = config::AppConfig::load_or_default(&config_path)?.with_env_overrides();
    info!("Config loaded");

    let resources = config.resource_loader();
    let manifest = Manifest::load(resources.as_ref())?;

    let runtime =
        Arc::new(LocalRuntime::new(&manifest.name).with_overrides(config.runtime_overrides()));
    if let Some(delay) = delay {
        runtime.set_override(DELAY_KEY, delay.to_string());
    }

    let pong = Arc::new(PongPeer::default());
    if config.loopback_pong {
        runtime.register_peer(pong::IDENTITY, pong.clone());
    }

    let agent = PingAgent::new(runtime.clone(), resources.as_ref())?;
    runtime.connect()?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, disconnecting");
    runtime.shutdown().await;
    info!(
        agent = %agent.manifest().name,
        answered = pong.answered(),
        "Agent stopped"
    );
    Ok(())
}
