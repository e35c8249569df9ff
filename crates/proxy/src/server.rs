//! Exit-side proxy server.
//!
//! Accepts proxy streams, dials the requested destination over plain TCP and
//! relays bytes in both directions until either side closes. Also serves the
//! ping protocol by closing probe streams straight away.

use futures::{AsyncWriteExt, StreamExt};
use libp2p::{PeerId, Stream};
use tokio::io::{copy, split};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::adapter::StreamAdapter;
use crate::messages::{read_message, write_message, ProxyResponse, Request};
use crate::{ProxyError, PING_PROTOCOL, PROXY_PROTOCOL};

use bethrou_host::{Host, IncomingStreams};

/// Handles incoming proxy requests on an exit node.
pub struct Server {
    host: Host,
}

impl Server {
    /// Install the proxy and ping handlers on the host. Streams are served
    /// by background tasks from this point on.
    pub fn new(host: Host) -> Result<Self, ProxyError> {
        let proxy_streams = host.accept_streams(PROXY_PROTOCOL)?;
        let ping_streams = host.accept_streams(PING_PROTOCOL)?;

        tokio::spawn(accept_proxy_streams(proxy_streams));
        tokio::spawn(accept_ping_streams(ping_streams));

        Ok(Self { host })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Block until the supervisor cancels. Handlers keep running in the
    /// background while this waits.
    pub async fn listen(&self, cancel: CancellationToken) {
        info!("Server is listening for incoming proxy streams");
        cancel.cancelled().await;
    }
}

async fn accept_proxy_streams(mut streams: IncomingStreams) {
    while let Some((peer, stream)) = streams.next().await {
        tokio::spawn(handle_proxy_stream(peer, stream));
    }
}

/// The probe handler closes the stream immediately; the client measures the
/// round trip to that close.
async fn accept_ping_streams(mut streams: IncomingStreams) {
    while let Some((peer, mut stream)) = streams.next().await {
        debug!(from = %peer, "ping stream");
        let _ = stream.close().await;
    }
}

async fn handle_proxy_stream(peer: PeerId, mut stream: Stream) {
    info!(from = %peer, "New proxy stream");

    let mut carry = Vec::new();
    let req: Request = match read_message(&mut stream, &mut carry).await {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to decode proxy request");
            send_error(&mut stream, &e).await;
            return;
        }
    };

    info!(addr = %req.address, "Proxying to");

    let conn = match TcpStream::connect(&req.address).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(addr = %req.address, error = %e, "Failed to connect to proxy address");
            send_error(&mut stream, &e).await;
            return;
        }
    };

    if let Err(e) = write_message(&mut stream, &ProxyResponse::ok()).await {
        error!(error = %e, "Failed to send success response");
        return;
    }

    info!(addr = %req.address, "Starting data forwarding");

    if let Err(e) = forward(stream, carry, conn).await {
        error!(error = %e, "Forwarding error");
    }

    info!(addr = %req.address, "Proxy stream completed");
}

async fn send_error(stream: &mut Stream, err: &(dyn std::fmt::Display + Send + Sync)) {
    let resp = ProxyResponse::error(err.to_string());
    if let Err(e) = write_message(stream, &resp).await {
        error!(error = %e, "Failed to encode error response");
    }
    let _ = stream.close().await;
}

/// Relay bytes between the proxy stream and the TCP connection with one copy
/// task per direction. The first direction to finish wins; the other is torn
/// down by closing both sides.
async fn forward(stream: Stream, carry: Vec<u8>, conn: TcpStream) -> Result<(), ProxyError> {
    // Bytes the request decoder over-read belong to the client->destination
    // direction; the adapter replays them first.
    let adapter = StreamAdapter::new(stream, carry);

    let (mut stream_rd, mut stream_wr) = split(adapter);
    let (mut conn_rd, mut conn_wr) = conn.into_split();

    let (done_tx, mut done_rx) = mpsc::channel::<std::io::Result<u64>>(2);
    let done_tx2 = done_tx.clone();

    let inbound = tokio::spawn(async move {
        let result = copy(&mut stream_rd, &mut conn_wr).await;
        let _ = done_tx.send(result).await;
    });
    let outbound = tokio::spawn(async move {
        let result = copy(&mut conn_rd, &mut stream_wr).await;
        let _ = done_tx2.send(result).await;
    });

    let first = done_rx.recv().await;

    // Dropping the halves closes both the stream and the socket, which
    // unblocks the remaining copy task.
    inbound.abort();
    outbound.abort();

    match first {
        Some(Err(e)) => Err(ProxyError::Receive(format!("forwarding failed: {e}"))),
        _ => Ok(()),
    }
}
