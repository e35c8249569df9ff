//! Bethrou client portal command line interface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bethrou_config::ClientConfig;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Bethrou client portal
#[derive(Parser)]
#[command(name = "client", version, about = "Bethrou client portal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the bethrou network
    Connect {
        /// Path to client config file
        #[arg(long, default_value = "./client.yaml")]
        config: PathBuf,

        /// Path to network.key file (overrides config)
        #[arg(long)]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect { config, key } => {
            let mut cfg = if config.exists() {
                ClientConfig::load(&config)
                    .with_context(|| format!("failed to load {}", config.display()))?
            } else {
                ClientConfig::default()
            };

            if let Some(key) = key {
                cfg.key = key.display().to_string();
            }

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                signal_cancel.cancel();
            });

            bethrou_client::run(cfg, cancel).await
        }
    }
}
