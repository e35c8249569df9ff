//! Bethrou SOCKS5
//!
//! Embedded SOCKS5 server with a pluggable [`Driver`]. The driver supplies
//! the four network capabilities the protocol needs (dial, listen, packet
//! listen, resolve); the proxy client plugs its overlay dial in here, so
//! CONNECT traffic leaves through an exit node while UDP associations stay
//! local.
//!
//! Implements RFC 1928 (CONNECT, UDP ASSOCIATE) and RFC 1929
//! username/password authentication. BIND is not supported.

mod driver;
mod proto;
mod server;
mod udp;

pub use driver::{BoxedConn, Conn, DefaultDriver, Driver};
pub use proto::TargetAddr;
pub use server::{BoundServer, Server};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocksError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unsupported SOCKS version: {0}")]
    BadVersion(u8),

    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    #[error("authentication failed")]
    AuthFailed,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),
}
