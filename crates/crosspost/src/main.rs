//! Crosspost: scheduled cross-platform post publishing.
//!
//! Single `daemon` subcommand: loads connected accounts, re-arms timers for
//! pending posts, and runs the dispatcher until interrupted.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

#[derive(Parser)]
#[command(name = "crosspost")]
#[command(about = "Scheduled cross-platform post publishing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling daemon (timers, reconciliation sweep, cleanup)
    Daemon {
        /// Path to the connected-accounts JSON file
        #[arg(long, env = "CROSSPOST_ACCOUNTS_FILE")]
        accounts_file: Option<PathBuf>,

        /// Reconciliation sweep interval in seconds
        #[arg(long, default_value = "300")]
        sweep_interval: u64,

        /// Per-platform publish call timeout in seconds
        #[arg(long, default_value = "60")]
        publish_timeout: u64,

        /// Maximum retry backoff in seconds
        #[arg(long, default_value = "3600")]
        max_backoff: u64,

        /// How long to keep completed posts, in days
        #[arg(long, default_value = "90")]
        retention_days: u32,

        /// Cleanup pass interval in seconds
        #[arg(long, default_value = "86400")]
        cleanup_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "crosspost=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            accounts_file,
            sweep_interval,
            publish_timeout,
            max_backoff,
            retention_days,
            cleanup_interval,
        } => {
            daemon::run(daemon::DaemonConfig {
                accounts_file,
                sweep_interval,
                publish_timeout,
                max_backoff,
                retention_days,
                cleanup_interval,
            })
            .await
        }
    }
}
