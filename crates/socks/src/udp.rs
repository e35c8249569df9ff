//! UDP ASSOCIATE relay.
//!
//! Datagrams are relayed on the local machine only; the overlay carries TCP
//! streams exclusively. One relay socket serves one association: packets
//! from the client carry the RFC 1928 UDP header and are unwrapped before
//! forwarding, replies from targets are wrapped and sent back.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::proto::{read_addr, TargetAddr, ATYP_DOMAIN};
use crate::Driver;

const MAX_DATAGRAM: usize = 64 * 1024;

/// Serve one UDP association until the token is cancelled (the owning TCP
/// connection closed).
pub async fn run_relay(
    socket: UdpSocket,
    driver: std::sync::Arc<dyn Driver>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut client_addr: Option<SocketAddr> = None;

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "UDP relay receive failed");
                    return;
                }
            },
        };

        let is_client = match client_addr {
            // First datagram pins the client for this association.
            None => {
                client_addr = Some(from);
                true
            }
            Some(addr) => addr == from,
        };

        if is_client {
            let Some((target, payload)) = decode_datagram(&buf[..len]).await else {
                debug!(from = %from, "dropping malformed UDP datagram");
                continue;
            };

            let dest = match target {
                TargetAddr::Ip(addr) => addr,
                TargetAddr::Domain(ref host, port) => {
                    match driver.resolve("udp", &format!("{host}:{port}")).await {
                        Ok(addr) => addr,
                        Err(e) => {
                            debug!(target = %target, error = %e, "UDP resolve failed");
                            continue;
                        }
                    }
                }
            };

            if let Err(e) = socket.send_to(&payload, dest).await {
                debug!(dest = %dest, error = %e, "UDP forward failed");
            }
        } else if let Some(client) = client_addr {
            // Reply from a target: wrap it and hand it to the client.
            let mut packet = encode_header(&from);
            packet.extend_from_slice(&buf[..len]);
            if let Err(e) = socket.send_to(&packet, client).await {
                debug!(client = %client, error = %e, "UDP reply failed");
            }
        }
    }
}

/// Strip the SOCKS UDP request header; fragmented datagrams are dropped.
async fn decode_datagram(buf: &[u8]) -> Option<(TargetAddr, Vec<u8>)> {
    if buf.len() < 4 || buf[0] != 0 || buf[1] != 0 {
        return None;
    }
    // FRAG other than zero is unsupported.
    if buf[2] != 0 {
        return None;
    }

    let mut reader: &[u8] = &buf[4..];
    let before = reader.len();
    let target = read_addr(&mut reader, buf[3]).await.ok()?;
    let consumed = before - reader.len();

    Some((target, buf[4 + consumed..].to_vec()))
}

/// Build the SOCKS UDP header for a reply from `addr`.
fn encode_header(addr: &SocketAddr) -> Vec<u8> {
    let mut buf = vec![0u8, 0u8, 0u8];
    match addr {
        SocketAddr::V4(v4) => {
            buf.push(crate::proto::ATYP_IPV4);
            buf.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            buf.push(crate::proto::ATYP_IPV6);
            buf.extend_from_slice(&v6.ip().octets());
        }
    }
    buf.extend_from_slice(&addr.port().to_be_bytes());
    buf
}

/// Build a client-side UDP request header for tests and tooling.
#[allow(dead_code)]
pub(crate) fn encode_domain_header(host: &str, port: u16) -> Vec<u8> {
    let mut buf = vec![0u8, 0u8, 0u8, ATYP_DOMAIN, host.len() as u8];
    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}
