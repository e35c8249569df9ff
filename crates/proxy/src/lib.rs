//! Bethrou proxy
//!
//! The data plane of the overlay: wire messages, the exit-node connection
//! pool with its routing strategies, the client-side dialer, the exit-side
//! server, and the background health probe loop.

mod adapter;
mod client;
pub mod health;
mod messages;
mod pool;
mod server;

pub use adapter::StreamAdapter;
pub use client::Client;
pub use messages::{
    read_message, write_message, ProxyResponse, Request, PING_PROTOCOL, PROXY_PROTOCOL,
    STATUS_ERROR, STATUS_OK,
};
pub use pool::{Connection, Pool, PoolStrategy, UNHEALTHY_LATENCY};
pub use server::Server;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("no exit nodes available")]
    NoExitNodes,

    #[error(transparent)]
    Host(#[from] bethrou_host::HostError),

    #[error("invalid multiaddr {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("failed to connect to node {node}: {reason}")]
    Connect { node: String, reason: String },

    #[error("failed to send request: {0}")]
    Send(std::io::Error),

    #[error("failed to read response: {0}")]
    Receive(String),

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("proxy failed: {0}")]
    Rejected(String),
}
