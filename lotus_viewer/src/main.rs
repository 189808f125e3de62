//! Lotus inspector - live per-tab request history, replay and lineage
//!
//! Usage:
//!   lotus watch <TAB_ID>            Inspect a tab's traffic
//!   lotus config set-server <URL>   Point at a capture process
//!   lotus config show               Print the current configuration

mod commands;
mod config;
mod format;
mod inspector;
mod mirror;
mod replay;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lotus_common::TabId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lotus")]
#[command(author = "Lotus Team")]
#[command(version)]
#[command(about = "Inspect, replay and prune a browser tab's HTTP traffic", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a tab's traffic live
    Watch {
        /// Tab to inspect
        tab_id: TabId,

        /// Capture process URL (overrides the config file)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Manage inspector configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set the capture process URL
    SetServer {
        /// e.g. http://127.0.0.1:4455
        url: String,
    },

    /// Print the current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,lotus_viewer={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Watch { tab_id, server } => {
            commands::watch::run(tab_id, server).await?;
        }

        Commands::Config { command } => match command {
            ConfigCommands::SetServer { url } => commands::config::set_server(&url)?,
            ConfigCommands::Show => commands::config::show()?,
        },
    }

    Ok(())
}
