//! Network behaviour for Bethrou hosts.
//!
//! Combines identify, AutoNAT, DCUtR hole punching, the relay client, an
//! optional relay service, and the raw stream protocol used by the proxy
//! data plane.

use libp2p::identity::Keypair;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{autonat, dcutr, identify, relay};

/// Identify protocol version exchanged between overlay members.
pub const IDENTIFY_PROTOCOL_VERSION: &str = "/bethrou/id/1.0.0";

/// Combined behaviour for both client and node hosts.
///
/// The relay *client* is always present (clients dial through circuits, NAT
/// bound nodes reserve slots); the relay *service* only runs on nodes started
/// in relay mode.
#[derive(NetworkBehaviour)]
pub struct BethrouBehaviour {
    pub identify: identify::Behaviour,
    pub autonat: autonat::Behaviour,
    pub dcutr: dcutr::Behaviour,
    pub relay_client: relay::client::Behaviour,
    pub relay_server: Toggle<relay::Behaviour>,
    pub stream: libp2p_stream::Behaviour,
}

impl BethrouBehaviour {
    pub fn new(
        keypair: &Keypair,
        relay_client: relay::client::Behaviour,
        relay_service: bool,
    ) -> Self {
        let local_peer_id = keypair.public().to_peer_id();

        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL_VERSION.to_string(), keypair.public())
                .with_agent_version(format!("bethrou/{}", env!("CARGO_PKG_VERSION"))),
        );

        let autonat = autonat::Behaviour::new(local_peer_id, autonat::Config::default());
        let dcutr = dcutr::Behaviour::new(local_peer_id);

        let relay_server = Toggle::from(
            relay_service.then(|| relay::Behaviour::new(local_peer_id, relay::Config::default())),
        );

        Self {
            identify,
            autonat,
            dcutr,
            relay_client,
            relay_server,
            stream: libp2p_stream::Behaviour::new(),
        }
    }

    /// Handle for opening and accepting raw protocol streams.
    pub fn stream_control(&self) -> libp2p_stream::Control {
        self.stream.new_control()
    }

    /// Whether the relay service is running on this host.
    pub fn relay_service_enabled(&self) -> bool {
        self.relay_server.as_ref().is_some()
    }
}
