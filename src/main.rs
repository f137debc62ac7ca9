// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! PANGOLIN CLI - grid daemon entry points

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use pangolin::config::{MasterConfig, SlaveConfig};
use pangolin::daemon::{LoopExit, MasterDaemon, SlaveDaemon};

/// PANGOLIN - distributed proof-attempt grid
#[derive(Parser)]
#[command(name = "pangolin")]
#[command(version, about, long_about = None)]
#[command(author = "PANGOLIN Project Team")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a slave daemon: accept and execute proof jobs
    Slave {
        /// Path to the slave configuration file
        config: PathBuf,
    },

    /// Run the master daemon: dispatch strategies across slaves
    Master {
        /// Path to the master configuration file
        config: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match cli.command {
        Commands::Slave { config } => slave_command(config).await,
        Commands::Master { config } => master_command(config).await,
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::{fmt, prelude::*};

    let filter = if verbose {
        EnvFilter::new("pangolin=debug,info")
    } else {
        EnvFilter::new("pangolin=info,warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// Slave command implementation. Re-enters the daemon on warm restart.
async fn slave_command(config_path: PathBuf) -> Result<()> {
    let config = SlaveConfig::load(&config_path)
        .context("Failed to load slave configuration")?;

    println!(
        "{}",
        format!("pangolin slave '{}' on port {}", config.name, config.port)
            .green()
            .bold()
    );

    loop {
        let daemon = SlaveDaemon::bind(config.clone())
            .await
            .context("Failed to start slave daemon")?;
        match daemon.run().await? {
            LoopExit::Restart => {
                info!("warm restart on port {}", config.port);
                continue;
            }
            LoopExit::Terminate => return Ok(()),
        }
    }
}

/// Master command implementation.
async fn master_command(config_path: PathBuf) -> Result<()> {
    let config = MasterConfig::load(&config_path)
        .context("Failed to load master configuration")?;

    println!(
        "{}",
        format!(
            "pangolin master: control port {}, {} strategies queued",
            config.control_port,
            config.strategies.len()
        )
        .green()
        .bold()
    );

    loop {
        let daemon = MasterDaemon::bind(config.clone())
            .await
            .context("Failed to start master daemon")?;
        match daemon.run().await? {
            LoopExit::Restart => {
                info!("warm restart of master");
                continue;
            }
            LoopExit::Terminate => return Ok(()),
        }
    }
}
