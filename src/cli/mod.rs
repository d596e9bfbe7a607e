//! Command-line interface for forge.
//!
//! Provides commands for running the engine behind its control surface,
//! running a single poll-and-submit cycle, and inspecting configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::{Marketplace, MarketplaceClient};
use crate::brain::Brain;
use crate::bridge::Bridge;
use crate::config::EngineConfig;
use crate::core::{EventBus, Orchestrator};
use crate::server::{self, AppState};

/// forge - Autonomous marketplace agent
#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .forge/config.yaml in this or a parent directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine behind the control surface until Ctrl-C
    Serve {
        /// Port to listen on (overrides config and ENGINE_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Wait for POST /control/start instead of starting immediately
        #[arg(long)]
        no_auto_start: bool,
    },

    /// Poll once; if a prompt is waiting, run the full pipeline
    Once,

    /// Show resolved configuration with credentials masked
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config_path = self.config.as_deref();
        match self.command {
            Commands::Serve {
                port,
                no_auto_start,
            } => {
                let mut config = EngineConfig::load(config_path)?;
                if let Some(port) = port {
                    config.server.port = port;
                }
                if no_auto_start {
                    config.server.auto_start = false;
                }
                serve(config).await
            }
            Commands::Once => run_once(EngineConfig::load(config_path)?).await,
            Commands::Config => show_config(EngineConfig::resolve(config_path)?),
        }
    }
}

/// Run the control surface with the engine wired to the event stream
async fn serve(config: EngineConfig) -> Result<()> {
    let bus = EventBus::new();
    let bridge = Bridge::new(config.server.heartbeat());
    bridge.attach(&bus);

    let engine = Orchestrator::from_config(&config, bus);
    let app = AppState { engine, bridge };

    server::serve(&config.server, app, shutdown_signal()).await
}

/// One poll; exits cleanly when nothing is waiting
async fn run_once(config: EngineConfig) -> Result<()> {
    let marketplace: Arc<dyn Marketplace> =
        Arc::new(MarketplaceClient::new(config.marketplace.clone()));

    let poll = marketplace
        .poll_prompt()
        .await
        .context("Failed to poll the marketplace")?;

    let Some(prompt) = poll.prompt.filter(|_| poll.ready) else {
        println!("{}", poll.reason);
        return Ok(());
    };

    info!(job_id = ?poll.job_id, "Prompt found, running pipeline");
    let engine = Orchestrator::new(
        &config,
        EventBus::new(),
        marketplace,
        Brain::from_config(&config.brain),
    );

    let submission = engine
        .execute(&prompt, poll.job_id.as_deref())
        .await
        .with_context(|| format!("Pipeline failed for job {:?}", poll.job_id))?;

    println!("Submitted.");
    if let Some(id) = submission.submission_id {
        println!("Submission ID: {}", id);
    }
    Ok(())
}

/// Print the resolved configuration and whether it would pass validation
fn show_config(config: EngineConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?;

    println!("Forge Configuration");
    println!();
    print!("{}", yaml);
    println!();
    println!("Providers (priority order):");
    for (name, has_key) in Brain::from_config(&config.brain).providers() {
        let status = if has_key { "ready" } else { "no API key" };
        println!("  {}: {}", name, status);
    }
    println!();
    match config.validate() {
        Ok(()) => println!("Status: ready"),
        Err(e) => println!("Status: invalid ({})", e),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
