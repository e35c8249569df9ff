//! Host construction and the swarm event loop.
//!
//! A [`Host`] is a cheap clonable handle onto a background task that owns the
//! libp2p swarm. Dial and address queries go through a command channel;
//! stream opening goes straight through the stream-protocol control, which is
//! safe to use from any task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use libp2p::core::transport::timeout::TransportTimeout;
use libp2p::core::transport::{ListenerId, Transport};
use libp2p::core::upgrade::Version;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::pnet::{PnetConfig, PreSharedKey};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{noise, relay, tcp, yamux, Multiaddr, PeerId, Stream, StreamProtocol, Swarm};
use libp2p_stream::IncomingStreams;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::behaviour::{BethrouBehaviour, BethrouBehaviourEvent};
use crate::psk;
use crate::HostError;

/// Hole-punching falls back to the relay after this long without a direct
/// connection.
const DIRECT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool connections are long-lived; proxy streams are opened per request, so
/// connections must survive idle periods between requests.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(u32::MAX as u64);

/// Upper bound on waiting for a relay slot reservation.
const RESERVATION_TIMEOUT: Duration = Duration::from_secs(30);

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a node (exit / relay) host.
pub struct NodeHostConfig {
    /// Multiaddress to listen on.
    pub listen_addr: Multiaddr,
    /// Persisted node identity.
    pub keypair: Keypair,
    /// Run the relay service so other peers can circuit through this node.
    pub relay_mode: bool,
    /// External relay to reserve a slot on (for NAT-bound nodes).
    pub connect_relay: Option<Multiaddr>,
    /// Path to the network PSK file.
    pub key_path: PathBuf,
}

enum Command {
    Dial {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<PeerId, HostError>>,
    },
    Addrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    Reserve {
        relay_addr: Multiaddr,
        reply: oneshot::Sender<Result<(), HostError>>,
    },
}

/// Handle onto a running peer host.
#[derive(Clone)]
pub struct Host {
    peer_id: PeerId,
    control: libp2p_stream::Control,
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl Host {
    /// Build a dial-only client host with an ephemeral identity.
    pub async fn client(key_path: &Path) -> Result<Self, HostError> {
        if key_path.as_os_str().is_empty() {
            return Err(HostError::Psk("network key path is required".to_string()));
        }

        let psk = psk::load(key_path)?;
        let keypair = bethrou_identity::generate();

        let host = Self::spawn(keypair, psk, false, None)?;
        info!(peer_id = %host.peer_id(), "Client host created");

        Ok(host)
    }

    /// Build a listening node host, optionally running the relay service and
    /// reserving a slot on an external relay.
    pub async fn node(cfg: NodeHostConfig) -> Result<Self, HostError> {
        if cfg.key_path.as_os_str().is_empty() {
            return Err(HostError::Psk("network key path is required".to_string()));
        }

        let psk = psk::load(&cfg.key_path)?;
        let host = Self::spawn(cfg.keypair, psk, cfg.relay_mode, Some(cfg.listen_addr))?;

        info!(peer_id = %host.peer_id(), "Node host created");

        if let Some(relay_addr) = cfg.connect_relay {
            info!(relay = %relay_addr, "Connecting to external relay");
            match host.reserve_relay(&relay_addr).await {
                Ok(()) => info!("Relay slot reserved"),
                Err(e) => warn!(error = %e, "failed to connect to relay"),
            }
        }

        Ok(host)
    }

    fn spawn(
        keypair: Keypair,
        psk: PreSharedKey,
        relay_service: bool,
        listen_addr: Option<Multiaddr>,
    ) -> Result<Self, HostError> {
        let mut swarm = build_swarm(keypair, psk, relay_service)?;
        let peer_id = *swarm.local_peer_id();
        let control = swarm.behaviour().stream_control();

        if swarm.behaviour().relay_service_enabled() {
            info!("Relay service running on this node");
        }

        if let Some(addr) = listen_addr {
            swarm.listen_on(addr.clone()).map_err(|e| HostError::Listen {
                addr,
                reason: e.to_string(),
            })?;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let event_loop = EventLoop {
            swarm,
            cmd_rx,
            cancel: cancel.clone(),
            listen_addrs: Vec::new(),
            pending_dials: HashMap::new(),
            pending_reservations: HashMap::new(),
        };
        tokio::spawn(event_loop.run());

        Ok(Self {
            peer_id,
            control,
            cmd_tx,
            cancel,
        })
    }

    /// Stable identifier derived from the host keypair.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Dial a peer at a `/p2p/`-qualified multiaddress and wait until the
    /// connection is established. Circuit addresses are dialled through the
    /// relay client transport.
    pub async fn connect(&self, addr: &Multiaddr) -> Result<PeerId, HostError> {
        if peer_id_from_addr(addr).is_none() {
            return Err(HostError::InvalidAddress(addr.to_string()));
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Dial {
                addr: addr.clone(),
                reply,
            })
            .await
            .map_err(|_| HostError::Closed)?;

        rx.await.map_err(|_| HostError::Closed)?
    }

    /// Open a new stream to a connected peer on the given protocol.
    pub async fn new_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<Stream, HostError> {
        let mut control = self.control.clone();
        control
            .open_stream(peer, protocol)
            .await
            .map_err(|e| HostError::Stream(e.to_string()))
    }

    /// Register a protocol and return the stream of inbound streams for it.
    /// Each protocol can be registered once per host.
    pub fn accept_streams(&self, protocol: StreamProtocol) -> Result<IncomingStreams, HostError> {
        self.control
            .clone()
            .accept(protocol.clone())
            .map_err(|_| HostError::ProtocolRegistered(protocol.to_string()))
    }

    /// Current listen and external addresses of this host.
    pub async fn addrs(&self) -> Vec<Multiaddr> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Addrs { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Dial a relay and reserve a circuit slot on it, making this host
    /// reachable at `<relay-addr>/p2p-circuit/p2p/<id>`.
    pub async fn reserve_relay(&self, relay_addr: &Multiaddr) -> Result<(), HostError> {
        self.connect(relay_addr).await?;

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Reserve {
                relay_addr: relay_addr.clone(),
                reply,
            })
            .await
            .map_err(|_| HostError::Closed)?;

        match tokio::time::timeout(RESERVATION_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::Closed),
            Err(_) => Err(HostError::Reservation(
                "timed out waiting for relay reservation".to_string(),
            )),
        }
    }

    /// Shut the host down, closing every connection and stream.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Extract the peer ID from the last `/p2p/` component of a multiaddress.
pub fn peer_id_from_addr(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter()
        .filter_map(|proto| match proto {
            Protocol::P2p(peer_id) => Some(peer_id),
            _ => None,
        })
        .last()
}

fn build_swarm(
    keypair: Keypair,
    psk: PreSharedKey,
    relay_service: bool,
) -> Result<Swarm<BethrouBehaviour>, HostError> {
    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_other_transport(|key| {
            let noise_config = noise::Config::new(key)?;
            let base = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
            let gated = base.and_then(move |socket, _| PnetConfig::new(psk).handshake(socket));

            Ok(TransportTimeout::new(
                gated
                    .upgrade(Version::V1Lazy)
                    .authenticate(noise_config)
                    .multiplex(yamux::Config::default()),
                DIRECT_DIAL_TIMEOUT,
            ))
        })
        .map_err(|e| HostError::Build(e.to_string()))?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(|e| HostError::Build(e.to_string()))?
        .with_behaviour(|key, relay_client| BethrouBehaviour::new(key, relay_client, relay_service))
        .map_err(|e| HostError::Build(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}

struct EventLoop {
    swarm: Swarm<BethrouBehaviour>,
    cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    listen_addrs: Vec<Multiaddr>,
    pending_dials: HashMap<ConnectionId, oneshot::Sender<Result<PeerId, HostError>>>,
    pending_reservations: HashMap<ListenerId, oneshot::Sender<Result<(), HostError>>>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle dropped; tear the host down.
                    None => break,
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }

        debug!("host event loop stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Dial { addr, reply } => {
                let opts = DialOpts::from(addr.clone());
                let connection_id = opts.connection_id();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(connection_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(HostError::Dial(format!("{addr}: {e}"))));
                    }
                }
            }
            Command::Addrs { reply } => {
                let mut addrs = self.listen_addrs.clone();
                for addr in self.swarm.external_addresses() {
                    if !addrs.contains(addr) {
                        addrs.push(addr.clone());
                    }
                }
                let _ = reply.send(addrs);
            }
            Command::Reserve { relay_addr, reply } => {
                let circuit_addr = relay_addr.with(Protocol::P2pCircuit);
                match self.swarm.listen_on(circuit_addr.clone()) {
                    Ok(listener_id) => {
                        self.pending_reservations.insert(listener_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(HostError::Reservation(format!(
                            "{circuit_addr}: {e}"
                        ))));
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<BethrouBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                info!(addr = %address, "Listening on");
                self.listen_addrs.push(address);
                if let Some(reply) = self.pending_reservations.remove(&listener_id) {
                    let _ = reply.send(Ok(()));
                }
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listen_addrs.retain(|a| a != &address);
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                if let Some(reply) = self.pending_reservations.remove(&listener_id) {
                    let _ = reply.send(Err(HostError::Reservation(format!(
                        "listener closed: {reason:?}"
                    ))));
                }
            }
            SwarmEvent::ListenerError { listener_id, error } => {
                if let Some(reply) = self.pending_reservations.remove(&listener_id) {
                    let _ = reply.send(Err(HostError::Reservation(error.to_string())));
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                info!(peer = %peer_id, remote = %endpoint.get_remote_address(), "Connected");
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Ok(peer_id));
                }
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                error,
                ..
            } => {
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(HostError::Dial(error.to_string())));
                } else {
                    debug!(error = %error, "outgoing connection failed");
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id, endpoint, ..
            } => {
                info!(peer = %peer_id, remote = %endpoint.get_remote_address(), "Disconnected");
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: BethrouBehaviourEvent) {
        match event {
            BethrouBehaviourEvent::Identify(event) => {
                debug!(?event, "identify");
            }
            BethrouBehaviourEvent::Autonat(event) => {
                debug!(?event, "autonat");
            }
            BethrouBehaviourEvent::Dcutr(event) => {
                debug!(?event, "hole punch");
            }
            BethrouBehaviourEvent::RelayClient(event) => {
                if let relay::client::Event::ReservationReqAccepted { relay_peer_id, .. } = &event {
                    info!(relay = %relay_peer_id, "Relay reservation accepted");
                } else {
                    debug!(?event, "relay client");
                }
            }
            BethrouBehaviourEvent::RelayServer(event) => {
                debug!(?event, "relay server");
            }
            BethrouBehaviourEvent::Stream(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_peer_id_from_plain_addr() {
        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/4001/p2p/{peer_id}")
            .parse()
            .unwrap();

        assert_eq!(peer_id_from_addr(&addr), Some(peer_id));
    }

    #[test]
    fn extracts_target_peer_from_circuit_addr() {
        let relay = Keypair::generate_ed25519().public().to_peer_id();
        let target = Keypair::generate_ed25519().public().to_peer_id();
        let addr: Multiaddr = format!("/ip4/10.0.0.1/tcp/4001/p2p/{relay}/p2p-circuit/p2p/{target}")
            .parse()
            .unwrap();

        assert_eq!(peer_id_from_addr(&addr), Some(target));
    }

    #[test]
    fn missing_peer_id_is_none() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(peer_id_from_addr(&addr), None);
    }
}
