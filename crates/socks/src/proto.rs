//! SOCKS5 wire protocol pieces (RFC 1928 / RFC 1929).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::SocksError;

pub const VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Destination requested by a SOCKS client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Read the client greeting and return the offered auth methods.
pub async fn read_greeting<R>(io: &mut R) -> Result<Vec<u8>, SocksError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    io.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(SocksError::BadVersion(head[0]));
    }

    let mut methods = vec![0u8; head[1] as usize];
    io.read_exact(&mut methods).await?;

    Ok(methods)
}

/// Read the RFC 1929 username/password subnegotiation.
pub async fn read_credentials<R>(io: &mut R) -> Result<(String, String), SocksError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    io.read_exact(&mut head).await?;
    if head[0] != AUTH_VERSION {
        return Err(SocksError::BadVersion(head[0]));
    }

    let mut user = vec![0u8; head[1] as usize];
    io.read_exact(&mut user).await?;

    let mut plen = [0u8; 1];
    io.read_exact(&mut plen).await?;
    let mut pass = vec![0u8; plen[0] as usize];
    io.read_exact(&mut pass).await?;

    Ok((
        String::from_utf8_lossy(&user).into_owned(),
        String::from_utf8_lossy(&pass).into_owned(),
    ))
}

/// Read a SOCKS request, returning the command and target address.
pub async fn read_request<R>(io: &mut R) -> Result<(u8, TargetAddr), SocksError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    io.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(SocksError::BadVersion(head[0]));
    }

    let cmd = head[1];
    let target = read_addr(io, head[3]).await?;

    Ok((cmd, target))
}

/// Read an `ATYP` + address + port triple.
pub async fn read_addr<R>(io: &mut R, atyp: u8) -> Result<TargetAddr, SocksError>
where
    R: AsyncRead + Unpin,
{
    match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            io.read_exact(&mut buf).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            io.read_exact(&mut len).await?;
            let mut host = vec![0u8; len[0] as usize];
            io.read_exact(&mut host).await?;
            let mut port = [0u8; 2];
            io.read_exact(&mut port).await?;
            Ok(TargetAddr::Domain(
                String::from_utf8_lossy(&host).into_owned(),
                u16::from_be_bytes(port),
            ))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            io.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(TargetAddr::Ip(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            )))
        }
        other => Err(SocksError::UnsupportedAddressType(other)),
    }
}

/// Encode a server reply with the given code and bind address.
pub fn encode_reply(code: u8, bind: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    buf.push(VERSION);
    buf.push(code);
    buf.push(0x00);

    match bind {
        SocketAddr::V4(addr) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&addr.ip().octets());
        }
    }
    buf.extend_from_slice(&bind.port().to_be_bytes());

    buf
}
