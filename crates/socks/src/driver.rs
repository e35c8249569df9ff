//! The network capability set behind the SOCKS server.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// A byte stream usable as the remote end of a proxied connection.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxedConn = Box<dyn Conn>;

/// Network operations the SOCKS server delegates to its embedder.
///
/// `dial` is the interesting one: the proxy client routes it through the
/// overlay. The listen variants stay on the local machine.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedConn>;

    async fn listen(&self, network: &str, address: &str) -> io::Result<TcpListener>;

    async fn listen_packet(&self, network: &str, address: &str) -> io::Result<UdpSocket>;

    async fn resolve(&self, network: &str, address: &str) -> io::Result<SocketAddr>;
}

/// Plain driver that talks to the local network directly. Used in tests and
/// as a reference implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDriver;

#[async_trait]
impl Driver for DefaultDriver {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxedConn> {
        match network {
            "tcp" => Ok(Box::new(TcpStream::connect(address).await?)),
            other => Err(unsupported_network(other)),
        }
    }

    async fn listen(&self, network: &str, address: &str) -> io::Result<TcpListener> {
        match network {
            "tcp" => TcpListener::bind(address).await,
            other => Err(unsupported_network(other)),
        }
    }

    async fn listen_packet(&self, network: &str, address: &str) -> io::Result<UdpSocket> {
        match network {
            "udp" => UdpSocket::bind(address).await,
            other => Err(unsupported_network(other)),
        }
    }

    async fn resolve(&self, network: &str, address: &str) -> io::Result<SocketAddr> {
        match network {
            "tcp" | "udp" => tokio::net::lookup_host(address)
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {address}"))
                }),
            other => Err(unsupported_network(other)),
        }
    }
}

fn unsupported_network(network: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unsupported network: {network}"),
    )
}
