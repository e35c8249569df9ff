//! SOCKS5 server: accept loop and per-connection state machine.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::proto::{
    encode_reply, read_credentials, read_greeting, read_request, CMD_CONNECT, CMD_UDP_ASSOCIATE,
    METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH, METHOD_USER_PASS, REP_COMMAND_NOT_SUPPORTED,
    REP_CONNECTION_REFUSED, REP_GENERAL_FAILURE, REP_HOST_UNREACHABLE, REP_SUCCESS,
};
use crate::udp;
use crate::{Driver, SocksError};

const UNSPECIFIED_BIND: &str = "0.0.0.0:0";

/// SOCKS5 server configuration: where to listen, how to authenticate, and
/// the driver supplying network operations.
pub struct Server {
    driver: Arc<dyn Driver>,
    listen_addr: String,
    credentials: Option<(String, String)>,
}

impl Server {
    pub fn new(driver: Arc<dyn Driver>, listen_addr: impl Into<String>) -> Self {
        Self {
            driver,
            listen_addr: listen_addr.into(),
            credentials: None,
        }
    }

    /// Require RFC 1929 username/password authentication.
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), pass.into()));
        self
    }

    /// Bind the listener through the driver. Serving starts with
    /// [`BoundServer::serve`].
    pub async fn bind(self) -> io::Result<BoundServer> {
        let listener = self.driver.listen("tcp", &self.listen_addr).await?;

        Ok(BoundServer {
            driver: self.driver,
            listener,
            credentials: self.credentials,
        })
    }
}

/// A server with its listener bound, ready to serve.
pub struct BoundServer {
    driver: Arc<dyn Driver>,
    listener: TcpListener,
    credentials: Option<(String, String)>,
}

impl BoundServer {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections until cancelled.
    pub async fn serve(self, cancel: CancellationToken) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "SOCKS5 server running");

        loop {
            let (socket, peer) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted?,
            };

            debug!(peer = %peer, "SOCKS5 connection");

            let driver = self.driver.clone();
            let credentials = self.credentials.clone();
            let session_cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, driver, credentials, session_cancel).await
                {
                    debug!(peer = %peer, error = %e, "SOCKS5 session ended");
                }
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    driver: Arc<dyn Driver>,
    credentials: Option<(String, String)>,
    cancel: CancellationToken,
) -> Result<(), SocksError> {
    negotiate_auth(&mut socket, credentials.as_ref()).await?;

    let (cmd, target) = read_request(&mut socket).await?;

    match cmd {
        CMD_CONNECT => handle_connect(socket, driver, target.to_string()).await,
        CMD_UDP_ASSOCIATE => handle_udp_associate(socket, driver, cancel).await,
        other => {
            let reply = encode_reply(
                REP_COMMAND_NOT_SUPPORTED,
                UNSPECIFIED_BIND.parse().expect("valid hardcoded address"),
            );
            socket.write_all(&reply).await?;
            Err(SocksError::UnsupportedCommand(other))
        }
    }
}

async fn negotiate_auth(
    socket: &mut TcpStream,
    credentials: Option<&(String, String)>,
) -> Result<(), SocksError> {
    let methods = read_greeting(socket).await?;

    match credentials {
        None => {
            if !methods.contains(&METHOD_NO_AUTH) {
                socket
                    .write_all(&[crate::proto::VERSION, METHOD_NO_ACCEPTABLE])
                    .await?;
                return Err(SocksError::NoAcceptableAuth);
            }
            socket
                .write_all(&[crate::proto::VERSION, METHOD_NO_AUTH])
                .await?;
            Ok(())
        }
        Some((user, pass)) => {
            if !methods.contains(&METHOD_USER_PASS) {
                socket
                    .write_all(&[crate::proto::VERSION, METHOD_NO_ACCEPTABLE])
                    .await?;
                return Err(SocksError::NoAcceptableAuth);
            }
            socket
                .write_all(&[crate::proto::VERSION, METHOD_USER_PASS])
                .await?;

            let (got_user, got_pass) = read_credentials(socket).await?;
            if &got_user != user || &got_pass != pass {
                socket.write_all(&[crate::proto::AUTH_VERSION, 0x01]).await?;
                return Err(SocksError::AuthFailed);
            }
            socket.write_all(&[crate::proto::AUTH_VERSION, 0x00]).await?;
            Ok(())
        }
    }
}

async fn handle_connect(
    mut socket: TcpStream,
    driver: Arc<dyn Driver>,
    target: String,
) -> Result<(), SocksError> {
    debug!(target = %target, "CONNECT");

    let mut conn = match driver.dial("tcp", &target).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(target = %target, error = %e, "dial failed");
            let code = match e.kind() {
                io::ErrorKind::ConnectionRefused => REP_CONNECTION_REFUSED,
                io::ErrorKind::NotFound | io::ErrorKind::TimedOut => REP_HOST_UNREACHABLE,
                _ => REP_GENERAL_FAILURE,
            };
            let reply = encode_reply(code, UNSPECIFIED_BIND.parse().expect("valid hardcoded address"));
            socket.write_all(&reply).await?;
            return Err(SocksError::Io(e));
        }
    };

    let reply = encode_reply(
        REP_SUCCESS,
        UNSPECIFIED_BIND.parse().expect("valid hardcoded address"),
    );
    socket.write_all(&reply).await?;

    // Relay until either side closes; errors here are ordinary teardown.
    let _ = tokio::io::copy_bidirectional(&mut socket, &mut conn).await;

    Ok(())
}

async fn handle_udp_associate(
    mut socket: TcpStream,
    driver: Arc<dyn Driver>,
    cancel: CancellationToken,
) -> Result<(), SocksError> {
    let local_ip = socket.local_addr()?.ip();
    let relay_socket = driver.listen_packet("udp", &format!("{local_ip}:0")).await?;
    let relay_addr = relay_socket.local_addr()?;

    debug!(relay = %relay_addr, "UDP ASSOCIATE");

    socket.write_all(&encode_reply(REP_SUCCESS, relay_addr)).await?;

    let relay_cancel = cancel.child_token();
    let relay = tokio::spawn(udp::run_relay(relay_socket, driver, relay_cancel.clone()));

    // The association lives exactly as long as the TCP control connection.
    let mut drain = [0u8; 64];
    loop {
        match tokio::io::AsyncReadExt::read(&mut socket, &mut drain).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    relay_cancel.cancel();
    let _ = relay.await;

    Ok(())
}
