use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared_logging::init_tracing;
use swarmsh_coordinator::{Coordinator, CoordinatorConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "swarmsh-coordinator",
    version,
    about = "Telemetry-driven swarm coordination core"
)]
struct Cli {
    /// TOML configuration; built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// `tracing` filter, overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_filter: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs every component until interrupted.
    Run {
        /// Record remediation actions without applying them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Validates the configuration and prints the agents and routes it yields.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    match cli.command.unwrap_or(Commands::Run { dry_run: false }) {
        Commands::Check => {
            for agent in &config.agents {
                println!("agent {} ({})", agent.id, agent.kind);
            }
            for route in &config.dispatch.routes {
                println!("route {} -> {:?}", route.prefix, route.route);
            }
            println!(
                "window {}s every {}s, decisions every {}s, dry_run={}",
                config.window.horizon_secs,
                config.window.tick_interval_secs,
                config.decision.cycle_interval_secs,
                config.remediation.dry_run
            );
            Ok(())
        }
        Commands::Run { dry_run } => {
            config.remediation.dry_run |= dry_run;
            init_tracing(&cli.log_filter, config.telemetry.json)
                .context("initialising tracing")?;
            let coordinator = Coordinator::bootstrap(config)
                .await
                .context("bootstrapping coordinator")?;
            let cancel = coordinator.cancellation();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("shutdown requested"),
                    Err(err) => warn!(error = %err, "listening for ctrl-c failed; stopping"),
                }
                cancel.cancel();
            });
            let report = coordinator.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
