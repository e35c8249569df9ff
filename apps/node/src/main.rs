//! Bethrou node command line interface.

mod run;

use std::path::PathBuf;

use anyhow::Result;
use bethrou_config::{DiscoveryConfig, LogConfig};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Bethrou node
#[derive(Parser)]
#[command(name = "node", version, about = "Bethrou node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start node
    Start {
        /// Listen address
        #[arg(long, default_value = "/ip4/0.0.0.0/tcp/4000")]
        listen: String,

        /// Enable relay service on this node
        #[arg(long)]
        relay_mode: bool,

        /// Connect to an external relay multiaddr (for NAT traversal)
        #[arg(long)]
        connect_relay: Option<String>,

        /// Path to network.key file (overrides default lookup)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Enable discover subscription (pub/sub)
        #[arg(long)]
        discover: bool,

        /// Server URL for discover pub/sub
        #[arg(long, default_value = "redis://localhost:6379")]
        discover_address: String,

        /// Optional redis username for discover
        #[arg(long, default_value = "")]
        discover_user: String,

        /// Optional redis password for discover
        #[arg(long, default_value = "")]
        discover_pass: String,

        /// Topic to subscribe for discover messages (defaults to node ID)
        #[arg(long, default_value = "")]
        discover_topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    bethrou_logging::setup(&LogConfig::default());

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            listen,
            relay_mode,
            connect_relay,
            key,
            discover,
            discover_address,
            discover_user,
            discover_pass,
            discover_topic,
        } => {
            let opts = run::NodeOptions {
                listen,
                relay_mode,
                connect_relay,
                key,
                discovery: DiscoveryConfig {
                    enabled: discover,
                    address: discover_address,
                    topic: discover_topic,
                    timeout: String::new(),
                    user: discover_user,
                    pass: discover_pass,
                },
            };

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                signal_cancel.cancel();
            });

            run::run(opts, cancel).await
        }
    }
}
