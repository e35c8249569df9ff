//! SOCKS driver backed by the overlay.
//!
//! `dial` routes through the proxy client, so every CONNECT leaves via an
//! exit node picked by the current strategy. Listeners and resolution stay
//! local, matching the local-only UDP behavior.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bethrou_proxy::Client;
use bethrou_socks::{BoxedConn, Driver};
use tokio::net::{TcpListener, UdpSocket};
use tracing::error;

pub struct ProxyDriver {
    proxy: Client,
}

impl ProxyDriver {
    pub fn new(proxy: Client) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Driver for ProxyDriver {
    async fn dial(&self, _network: &str, address: &str) -> io::Result<BoxedConn> {
        let conn = self.proxy.dial_by_strategy(address).await.map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("failed to dial through any node: {e}"),
            )
        })?;

        Ok(Box::new(conn))
    }

    async fn listen(&self, network: &str, address: &str) -> io::Result<TcpListener> {
        match network {
            "tcp" => TcpListener::bind(address).await.map_err(|e| {
                error!(address, network, error = %e, "failed to listen");
                e
            }),
            other => Err(unsupported_network(other)),
        }
    }

    async fn listen_packet(&self, network: &str, address: &str) -> io::Result<UdpSocket> {
        match network {
            "udp" => UdpSocket::bind(address).await.map_err(|e| {
                error!(address, network, error = %e, "failed to listen packet");
                e
            }),
            other => Err(unsupported_network(other)),
        }
    }

    async fn resolve(&self, network: &str, address: &str) -> io::Result<SocketAddr> {
        match network {
            "tcp" | "udp" => tokio::net::lookup_host(address)
                .await?
                .next()
                .ok_or_else(|| {
                    error!(address, network, "failed to resolve address");
                    io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {address}"))
                }),
            _ => Err(unsupported_network(network)),
        }
    }
}

fn unsupported_network(network: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unsupported network: {network}"),
    )
}
