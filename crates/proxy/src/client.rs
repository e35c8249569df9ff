//! Client-side proxy dialer.
//!
//! Connects to a configured set of exit nodes, records them in the pool, and
//! opens proxy streams to pool members on behalf of the SOCKS layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bethrou_config::NodeDescriptor;
use bethrou_host::{Host, Multiaddr, PeerId};
use futures::AsyncReadExt;
use tracing::{debug, info};

use crate::adapter::StreamAdapter;
use crate::messages::{read_message, write_message, ProxyResponse, Request};
use crate::pool::{Pool, PoolStrategy};
use crate::{ProxyError, PING_PROTOCOL, PROXY_PROTOCOL};

/// Client-side proxy dialer that connects to exit nodes.
#[derive(Clone)]
pub struct Client {
    host: Host,
    pool: Arc<Pool>,
}

impl Client {
    pub fn new(host: Host, pool: Arc<Pool>) -> Self {
        Self { host, pool }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Probe a node: wall-clock time from opening the ping stream until the
    /// remote close is observed.
    pub async fn ping(&self, peer_id: PeerId) -> Result<Duration, ProxyError> {
        let start = Instant::now();

        let mut stream = self
            .host
            .new_stream(peer_id, PING_PROTOCOL)
            .await
            .map_err(|e| ProxyError::Receive(format!("probe new stream failed: {e}")))?;

        // The handler closes the stream without writing; any outcome of this
        // read means the round trip completed.
        let mut buf = [0u8; 1];
        let _ = stream.read(&mut buf).await;

        Ok(start.elapsed())
    }

    /// Open a proxy stream to a specific exit node and perform the
    /// handshake. Returns a byte stream that behaves like an ordinary
    /// network connection to `addr`.
    pub async fn dial(&self, peer_id: PeerId, addr: &str) -> Result<StreamAdapter, ProxyError> {
        let mut stream = self.host.new_stream(peer_id, PROXY_PROTOCOL).await?;

        let req = Request {
            address: addr.to_string(),
        };
        write_message(&mut stream, &req)
            .await
            .map_err(ProxyError::Send)?;

        let mut carry = Vec::new();
        let resp: ProxyResponse = read_message(&mut stream, &mut carry).await?;

        if !resp.is_ok() {
            return Err(ProxyError::Rejected(resp.message.unwrap_or_default()));
        }

        Ok(StreamAdapter::new(stream, carry))
    }

    pub async fn dial_random(&self, addr: &str) -> Result<StreamAdapter, ProxyError> {
        let conn = self.pool.select_random().ok_or(ProxyError::NoExitNodes)?;
        self.dial(conn.peer_id, addr).await
    }

    pub async fn dial_fastest(&self, addr: &str) -> Result<StreamAdapter, ProxyError> {
        let conn = self.pool.select_fastest().ok_or(ProxyError::NoExitNodes)?;
        self.dial(conn.peer_id, addr).await
    }

    pub async fn dial_round_robin(&self, addr: &str) -> Result<StreamAdapter, ProxyError> {
        let conn = self
            .pool
            .select_round_robin()
            .ok_or(ProxyError::NoExitNodes)?;
        self.dial(conn.peer_id, addr).await
    }

    /// Dial an exit node picked by the pool's current strategy.
    pub async fn dial_by_strategy(&self, addr: &str) -> Result<StreamAdapter, ProxyError> {
        match self.pool.get_strategy() {
            PoolStrategy::Random => self.dial_random(addr).await,
            PoolStrategy::Fastest => self.dial_fastest(addr).await,
            PoolStrategy::RoundRobin => self.dial_round_robin(addr).await,
        }
    }

    /// Connect to every descriptor, adding each to the pool. Fails fast on
    /// the first node that cannot be reached: the initial set starts clean
    /// or not at all.
    pub async fn connect(&self, nodes: &[NodeDescriptor]) -> Result<(), ProxyError> {
        for node in nodes {
            self.connect_node(node).await?;
        }

        Ok(())
    }

    async fn connect_node(&self, node: &NodeDescriptor) -> Result<(), ProxyError> {
        if let Some(relay) = node.relay.as_deref().filter(|r| !r.is_empty()) {
            return self.connect_via_relay(node, relay).await;
        }

        info!(node = %node.id, addrs_count = node.addrs.len(), "Attempting to connect to node");
        debug!(node = %node.id, addrs = ?node.addrs, "Node addresses");

        let mut last_err: Option<ProxyError> = None;
        for addr in &node.addrs {
            let ma: Multiaddr = match addr.parse() {
                Ok(ma) => ma,
                Err(e) => {
                    last_err = Some(ProxyError::InvalidAddress {
                        addr: addr.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.host.connect(&ma).await {
                Ok(peer_id) => {
                    self.pool.add(peer_id, addr.clone());
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(ProxyError::Host(e));
                }
            }
        }

        Err(ProxyError::Connect {
            node: node.id.clone(),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses provided".to_string()),
        })
    }

    /// Relay path: connect to the relay first, then reach the node over a
    /// circuit address. Either dial failing is fatal for this descriptor.
    async fn connect_via_relay(
        &self,
        node: &NodeDescriptor,
        relay: &str,
    ) -> Result<(), ProxyError> {
        let relay_ma: Multiaddr = relay.parse().map_err(|e: libp2p::multiaddr::Error| {
            ProxyError::InvalidAddress {
                addr: relay.to_string(),
                reason: e.to_string(),
            }
        })?;

        let relay_peer = self
            .host
            .connect(&relay_ma)
            .await
            .map_err(|e| ProxyError::Connect {
                node: node.id.clone(),
                reason: format!("failed to connect to relay: {e}"),
            })?;

        info!(relay = %relay_peer, "Connected to relay");

        let circuit = format!("{relay}/p2p-circuit/p2p/{}", node.id);
        let circuit_ma: Multiaddr =
            circuit
                .parse()
                .map_err(|e: libp2p::multiaddr::Error| ProxyError::InvalidAddress {
                    addr: circuit.clone(),
                    reason: e.to_string(),
                })?;

        info!(addr = %circuit_ma, "Attempting to connect using circuit address");

        let peer_id = self
            .host
            .connect(&circuit_ma)
            .await
            .map_err(|e| ProxyError::Connect {
                node: node.id.clone(),
                reason: format!("failed to connect to node via relay: {e}"),
            })?;

        info!(node = %node.id, relay = %relay_peer, "Connected to node via relay");
        self.pool.add(peer_id, circuit);

        Ok(())
    }
}
