//! provmond — the provgrid provision monitor daemon.
//!
//! Assembles the provisioning core:
//! - Resource selector over the registered cybernodes
//! - Pending queues and the dispatch loop
//! - Provision task worker pool
//! - Event notification pool
//! - Timing watches
//! - Peer initial-load barrier
//!
//! # Usage
//!
//! ```text
//! provmond standalone --config provmond.toml
//! provmond validate --config provmond.toml
//! ```

mod deployment;
mod local_node;
mod standalone;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use prov_core::MonitorConfig;

const DEFAULT_FILTER: &str = "info,provmond=debug,provgrid=debug";

#[derive(Parser)]
#[command(name = "provmond", about = "provgrid provision monitor")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a monitor with simulated in-process cybernodes.
    Standalone {
        /// Path to provmond.toml.
        #[arg(long, default_value = "provmond.toml")]
        config: PathBuf,

        /// Watch statistics log interval in seconds.
        #[arg(long, default_value = "60")]
        report_interval: u64,
    },
    /// Parse and check a configuration file, then print it with defaults filled in.
    Validate {
        #[arg(long, default_value = "provmond.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    let config = MonitorConfig::from_file(path)?;
    info!(path = ?path, "configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            report_interval,
        } => {
            let config = load_config(&config)?;
            standalone::run(config, Duration::from_secs(report_interval.max(1))).await
        }
        Command::Validate { config } => {
            let config = load_config(&config)?;
            info!(
                monitor = %config.monitor.name,
                cybernodes = config.cybernodes.len(),
                deployments = config.deployments.len(),
                "configuration is valid"
            );
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
