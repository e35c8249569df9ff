//! Client supervisor: wires host, pool, dialer, discovery, health loop and
//! the SOCKS listener, and tears everything down on cancellation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bethrou_config::{ClientConfig, DiscoveryConfig, NodeDescriptor};
use bethrou_discovery as discovery;
use bethrou_host::Host;
use bethrou_proxy::{health, Client, Pool, PoolStrategy};
use bethrou_socks::Server as SocksServer;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::driver::ProxyDriver;

/// Run the client until the token is cancelled. The host and any discovery
/// connection are closed on every exit path.
pub async fn run(cfg: ClientConfig, cancel: CancellationToken) -> Result<()> {
    cfg.validate().context("invalid configuration")?;

    bethrou_logging::setup(&cfg.log);

    info!(strategy = %PoolStrategy::parse(&cfg.routing.strategy), listen = %cfg.server.listen, "Starting client");

    let host = Host::client(Path::new(&cfg.key))
        .await
        .context("failed to create host")?;

    let result = run_with_host(&cfg, &host, cancel).await;
    host.close();

    result
}

async fn run_with_host(cfg: &ClientConfig, host: &Host, cancel: CancellationToken) -> Result<()> {
    info!(id = %host.peer_id(), "Client host created");

    let pool = Arc::new(Pool::new(PoolStrategy::parse(&cfg.routing.strategy)));
    let client = Client::new(host.clone(), pool.clone());

    let mut nodes = cfg.nodes.clone();
    if !nodes.is_empty() {
        info!(count = nodes.len(), "Loaded static nodes from config");
    }

    if cfg.discovery.enabled {
        let discovered = discover(&cfg.discovery, &cancel)
            .await
            .context("discovery failed")?;
        nodes = merge_nodes(nodes, discovered);
    }

    info!("Connecting to exit nodes");
    client
        .connect(&nodes)
        .await
        .context("failed to connect to exit nodes")?;
    info!(count = pool.size(), "Connected to exit nodes");

    if let Some(interval) = cfg.routing.health_interval() {
        let timeout = cfg.routing.probe_timeout();
        tokio::spawn(health::run(
            client.clone(),
            interval,
            timeout,
            cancel.child_token(),
        ));
    }

    let driver = Arc::new(ProxyDriver::new(client));
    let mut server = SocksServer::new(driver, &cfg.server.listen);
    if cfg.server.auth {
        server = server.with_credentials(&cfg.server.user, &cfg.server.pass);
    }

    let bound = server
        .bind()
        .await
        .context("failed to create SOCKS server")?;
    info!(addr = %cfg.server.listen, "SOCKS5 server running");

    bound
        .serve(cancel)
        .await
        .context("SOCKS5 server error")?;

    Ok(())
}

/// One-shot discovery run; enumerating zero nodes is an error so the caller
/// can fall back to static configuration or abort startup.
async fn discover(
    cfg: &DiscoveryConfig,
    cancel: &CancellationToken,
) -> Result<Vec<NodeDescriptor>> {
    if cfg.topic.is_empty() {
        bail!("discovery topic is required");
    }

    let service = discovery::Service::new(discovery::Config::from(cfg), None)?;

    info!(topic = %cfg.topic, timeout = ?cfg.timeout_duration(), "Running discovery");

    let nodes = service.discover(cancel).await?;
    if nodes.is_empty() {
        bail!("discovery returned no nodes");
    }

    Ok(nodes)
}

/// Merge discovered nodes into the static set, deduplicating by ID. Static
/// entries win; discovered ones keep their arrival order.
pub fn merge_nodes(
    static_nodes: Vec<NodeDescriptor>,
    discovered: Vec<NodeDescriptor>,
) -> Vec<NodeDescriptor> {
    if static_nodes.is_empty() {
        info!(count = discovered.len(), "No static nodes found; using discovered nodes");
        return discovered;
    }

    let mut seen: HashSet<String> = static_nodes.iter().map(|n| n.id.clone()).collect();
    let total = discovered.len();

    let mut merged = static_nodes;
    let mut added = 0;
    for node in discovered {
        if seen.insert(node.id.clone()) {
            merged.push(node);
            added += 1;
        }
    }

    info!(total, added, "Discovered nodes");
    merged
}
