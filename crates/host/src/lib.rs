//! Bethrou peer host
//!
//! Authenticated endpoint onto the private overlay network:
//!
//! - PSK-gated transport (handshakes with non-members fail)
//! - identity bound to the node keypair
//! - NAT traversal via AutoNAT + DCUtR hole punching
//! - relay circuits (client always, service on relay nodes)
//! - raw per-protocol streams for the proxy data plane

mod behaviour;
mod host;
pub mod psk;

pub use behaviour::{BethrouBehaviour, BethrouBehaviourEvent, IDENTIFY_PROTOCOL_VERSION};
pub use host::{peer_id_from_addr, Host, NodeHostConfig};

use thiserror::Error;

// Re-export the libp2p types that appear in the public surface.
pub use libp2p::{Multiaddr, PeerId, Stream, StreamProtocol};
pub use libp2p_stream::IncomingStreams;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("network key error: {0}")]
    Psk(String),

    #[error("invalid peer address {0} (missing /p2p component?)")]
    InvalidAddress(String),

    #[error("failed to build host: {0}")]
    Build(String),

    #[error("failed to listen on {addr}: {reason}")]
    Listen { addr: Multiaddr, reason: String },

    #[error("failed to dial {0}")]
    Dial(String),

    #[error("failed to open stream: {0}")]
    Stream(String),

    #[error("stream protocol already registered: {0}")]
    ProtocolRegistered(String),

    #[error("relay reservation failed: {0}")]
    Reservation(String),

    #[error("host is closed")]
    Closed,
}
