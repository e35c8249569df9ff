//! Wire messages on proxy streams.
//!
//! Framing is plain JSON, one object per message. The writer appends a
//! newline; the reader consumes exactly one top-level value and hands any
//! over-read bytes back to the caller, since the stream switches to raw byte
//! forwarding right after the handshake.

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::StreamProtocol;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ProxyError;

/// Data-plane protocol carrying proxied connections.
pub const PROXY_PROTOCOL: StreamProtocol = StreamProtocol::new("/bethrou/proxy/1.0.0");

/// Latency probe protocol; the handler closes the stream immediately.
pub const PING_PROTOCOL: StreamProtocol = StreamProtocol::new("/bethrou/ping/1.0.0");

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// A handshake message may not exceed this; anything larger is malformed.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 1024;

/// Proxy request: the destination the exit node should dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub address: String,
}

/// Exit node reply to a proxy request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProxyResponse {
    pub fn ok() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Write one JSON message followed by a newline.
pub async fn write_message<T, W>(io: &mut W, msg: &T) -> std::io::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    bytes.push(b'\n');

    io.write_all(&bytes).await?;
    io.flush().await
}

/// Read exactly one JSON message.
///
/// `carry` holds bytes read past the end of the message; callers forwarding
/// raw data afterwards must treat its contents as the head of that data.
pub async fn read_message<T, R>(io: &mut R, carry: &mut Vec<u8>) -> Result<T, ProxyError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    loop {
        if !carry.is_empty() {
            let mut values = serde_json::Deserializer::from_slice(carry).into_iter::<T>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = values.byte_offset();
                    carry.drain(..consumed);
                    // The encoder's trailing newline is framing, not payload.
                    if carry.first() == Some(&b'\n') {
                        carry.remove(0);
                    }
                    return Ok(value);
                }
                Some(Err(e)) if e.is_eof() => {}
                Some(Err(e)) => return Err(ProxyError::Decode(e.to_string())),
                None => {}
            }

            if carry.len() > MAX_MESSAGE_SIZE {
                return Err(ProxyError::Decode("message too large".to_string()));
            }
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = io
            .read(&mut chunk)
            .await
            .map_err(|e| ProxyError::Receive(e.to_string()))?;
        if n == 0 {
            return Err(ProxyError::Receive(
                "unexpected end of stream".to_string(),
            ));
        }
        carry.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[test]
    fn protocol_ids() {
        assert_eq!(PROXY_PROTOCOL.as_ref(), "/bethrou/proxy/1.0.0");
        assert_eq!(PING_PROTOCOL.as_ref(), "/bethrou/ping/1.0.0");
    }

    #[test]
    fn response_serialization_omits_empty_message() {
        let ok = serde_json::to_string(&ProxyResponse::ok()).unwrap();
        assert_eq!(ok, r#"{"status":"ok"}"#);

        let err = serde_json::to_string(&ProxyResponse::error("dial failed")).unwrap();
        assert_eq!(err, r#"{"status":"error","message":"dial failed"}"#);
    }

    #[tokio::test]
    async fn round_trips_a_request() {
        let mut buf = Vec::new();
        let req = Request {
            address: "example.com:443".to_string(),
        };
        write_message(&mut buf, &req).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = Cursor::new(buf);
        let mut carry = Vec::new();
        let decoded: Request = read_message(&mut reader, &mut carry).await.unwrap();
        assert_eq!(decoded, req);
        assert!(carry.is_empty());
    }

    #[tokio::test]
    async fn preserves_bytes_after_the_message() {
        let mut wire = Vec::new();
        write_message(&mut wire, &ProxyResponse::ok()).await.unwrap();
        wire.extend_from_slice(b"payload bytes");

        let mut reader = Cursor::new(wire);
        let mut carry = Vec::new();
        let resp: ProxyResponse = read_message(&mut reader, &mut carry).await.unwrap();
        assert!(resp.is_ok());
        // Trailing newline was framing; the payload survives untouched.
        assert_eq!(carry, b"payload bytes");
    }

    #[tokio::test]
    async fn accepts_messages_without_trailing_newline() {
        let wire = br#"{"status":"ok"}"#.to_vec();
        let mut reader = Cursor::new(wire);
        let mut carry = Vec::new();
        let resp: ProxyResponse = read_message(&mut reader, &mut carry).await.unwrap();
        assert!(resp.is_ok());
        assert!(carry.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let mut reader = Cursor::new(b"{not json}\n".to_vec());
        let mut carry = Vec::new();
        let result: Result<Request, _> = read_message(&mut reader, &mut carry).await;
        assert!(matches!(result, Err(ProxyError::Decode(_))));
    }

    #[tokio::test]
    async fn rejects_truncated_stream() {
        let mut reader = Cursor::new(br#"{"address": "exa"#.to_vec());
        let mut carry = Vec::new();
        let result: Result<Request, _> = read_message(&mut reader, &mut carry).await;
        assert!(matches!(result, Err(ProxyError::Receive(_))));
    }

    #[tokio::test]
    async fn handles_message_split_across_reads() {
        // Cursor delivers everything at once, so simulate the split by
        // pre-seeding the carry buffer with the first half.
        let mut carry = br#"{"address":"#.to_vec();
        let mut reader = Cursor::new(br#""example.com:80"}"#.to_vec());
        let decoded: Request = read_message(&mut reader, &mut carry).await.unwrap();
        assert_eq!(decoded.address, "example.com:80");
    }
}
