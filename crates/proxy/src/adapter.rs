//! Adapts a p2p stream to the tokio I/O traits.
//!
//! The SOCKS layer and the forwarding loops speak tokio `AsyncRead` /
//! `AsyncWrite`; libp2p streams speak the futures-io traits. The adapter
//! bridges the two and replays any bytes the handshake decoder read past the
//! end of its message.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Synthetic address label reported for proxied connections.
pub const ADDR_LABEL: &str = "libp2p";

/// Byte-oriented view over a p2p stream.
pub struct StreamAdapter<S = libp2p::Stream> {
    inner: S,
    leftover: Vec<u8>,
}

impl<S> StreamAdapter<S> {
    /// Wrap a stream. `leftover` is served to readers before the stream
    /// itself, preserving data that arrived glued to the handshake response.
    pub fn new(inner: S, leftover: Vec<u8>) -> Self {
        Self { inner, leftover }
    }

    /// Local endpoint label. Proxied connections have no meaningful socket
    /// address.
    pub fn local_label(&self) -> &'static str {
        ADDR_LABEL
    }

    /// Remote endpoint label.
    pub fn remote_label(&self) -> &'static str {
        ADDR_LABEL
    }
}

impl<S> AsyncRead for StreamAdapter<S>
where
    S: futures::AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if !this.leftover.is_empty() {
            let n = buf.remaining().min(this.leftover.len());
            buf.put_slice(&this.leftover[..n]);
            this.leftover.drain(..n);
            return Poll::Ready(Ok(()));
        }

        let unfilled = buf.initialize_unfilled();
        match Pin::new(&mut this.inner).poll_read(cx, unfilled) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> AsyncWrite for StreamAdapter<S>
where
    S: futures::AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}
