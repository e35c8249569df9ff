//! Node supervisor: identity, host, proxy server and the optional discovery
//! responder.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bethrou_config::DiscoveryConfig;
use bethrou_discovery as discovery;
use bethrou_host::{psk, Host, Multiaddr, NodeHostConfig};
use bethrou_identity::IdentityManager;
use bethrou_proxy::Server;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct NodeOptions {
    pub listen: String,
    pub relay_mode: bool,
    pub connect_relay: Option<String>,
    pub key: Option<PathBuf>,
    pub discovery: DiscoveryConfig,
}

/// Run the node until the token is cancelled. The host is closed on every
/// exit path.
pub async fn run(opts: NodeOptions, cancel: CancellationToken) -> Result<()> {
    info!(
        listen = %opts.listen,
        relay_mode = opts.relay_mode,
        discover = opts.discovery.enabled,
        "Starting Bethrou node",
    );

    let key_path = psk::locate(opts.key.as_deref())?;

    let keypair = IdentityManager::new("node.key")
        .load_or_generate()
        .context("failed to load identity")?;

    let listen_addr: Multiaddr = opts
        .listen
        .parse()
        .with_context(|| format!("invalid listen multiaddr: {}", opts.listen))?;

    let connect_relay = opts
        .connect_relay
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| {
            r.parse::<Multiaddr>()
                .with_context(|| format!("invalid relay multiaddr: {r}"))
        })
        .transpose()?;

    let host = Host::node(NodeHostConfig {
        listen_addr,
        keypair,
        relay_mode: opts.relay_mode,
        connect_relay,
        key_path,
    })
    .await
    .context("failed to create node")?;

    let result = serve(&host, &opts, cancel).await;
    host.close();

    result
}

async fn serve(host: &Host, opts: &NodeOptions, cancel: CancellationToken) -> Result<()> {
    let server = Server::new(host.clone()).context("failed to install proxy handlers")?;

    info!("Exit node ready, listening for proxy streams");
    log_full_addresses(host).await;

    if opts.discovery.enabled {
        let service = discovery::Service::new(
            discovery::Config::from(&opts.discovery),
            Some(host.clone()),
        )
        .context("failed to create discovery service")?;

        let discovery_cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = service.start(discovery_cancel).await {
                error!(error = %e, "Discovery error");
            }
        });
    }

    server.listen(cancel).await;

    info!("Shutting down node");
    Ok(())
}

/// Listen addresses arrive asynchronously; give the swarm a moment so the
/// dialable addresses land in the startup log.
async fn log_full_addresses(host: &Host) {
    let peer_id = host.peer_id();

    for _ in 0..20 {
        let addrs = host.addrs().await;
        if !addrs.is_empty() {
            info!("Full exit node addresses");
            for addr in addrs {
                info!(addr = %format!("{addr}/p2p/{peer_id}"), "address");
            }
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
