//! Buffered connection I/O. Grounded on the teacher's `src/proto/h1/io.rs`,
//! simplified from its read-strategy/write-strategy generality down to the
//! single growable-read-buffer-plus-flushed-write-buffer shape this core
//! actually needs (one request, then close — no pipelining, no partial
//! writev scatter-gather).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const INITIAL_READ_CAPACITY: usize = 8 * 1024;

/// Any transport the Connection State Machine can drive: a plain
/// [`tokio::net::TcpStream`], a TLS-wrapped stream, or (in tests) an
/// in-memory duplex pair. Grounded on the teacher's `src/upgrade.rs` `Io`
/// trait, which exists for the same reason — erasing the concrete socket
/// type at the one seam (here, connection construction) that needs to hand
/// the same type to every code path regardless of how it was bound.
pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A type-erased transport, boxed once at connection construction so that
/// every downstream type (the read/write halves, the WebSocket stream) is a
/// concrete, non-generic type.
pub(crate) type BoxedIo = Box<dyn Io>;

/// Wraps a socket (or any `AsyncRead + AsyncWrite`) with a read buffer the
/// HTTP/1.1 codec parses directly out of, and a write buffer that batches
/// outbound bytes until [`BufferedIo::flush`] is called.
pub(crate) struct BufferedIo<T> {
    io: T,
    pub(crate) read_buf: BytesMut,
    write_buf: Vec<u8>,
}

impl<T> BufferedIo<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: T) -> Self {
        BufferedIo {
            io,
            read_buf: BytesMut::with_capacity(INITIAL_READ_CAPACITY),
            write_buf: Vec::new(),
        }
    }

    /// Read more bytes from the socket into `read_buf`. Returns the number
    /// of bytes read; `0` means the peer closed its write half (EOF).
    pub(crate) async fn read_more(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; 8 * 1024];
        let n = self.io.read(&mut chunk).await?;
        if n > 0 {
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    /// Queue bytes for the next [`flush`](Self::flush).
    pub(crate) fn queue_write(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Flush any queued bytes to the socket.
    pub(crate) async fn flush(&mut self) -> std::io::Result<()> {
        if !self.write_buf.is_empty() {
            self.io.write_all(&self.write_buf).await?;
            self.write_buf.clear();
        }
        self.io.flush().await
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        self.io.shutdown().await
    }

    /// Consume `self`, returning the underlying transport and any bytes
    /// already buffered past the part of the stream the caller has
    /// processed. Used once per connection, to hand the transport off to
    /// the split receive/send halves after the initial request has parsed.
    pub(crate) fn into_parts(self) -> (T, BytesMut) {
        (self.io, self.read_buf)
    }
}

/// Wraps a transport with bytes that were already read off the wire but
/// belong to whatever comes next on the stream — e.g. WebSocket frames the
/// peer pipelined in the same TCP segment as the upgrade request. Reads
/// drain `prefix` first, then fall through to `inner`; writes go straight to
/// `inner`.
pub(crate) struct PrefixedIo<T> {
    prefix: BytesMut,
    inner: T,
}

impl<T> PrefixedIo<T> {
    pub(crate) fn new(prefix: BytesMut, inner: T) -> Self {
        PrefixedIo { prefix, inner }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for PrefixedIo<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = std::cmp::min(this.prefix.len(), buf.remaining());
            let chunk = this.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for PrefixedIo<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_more_reads_into_buffer() {
        let (mut client, server) = duplex(64);
        let mut io = BufferedIo::new(server);
        client.write_all(b"hello").await.unwrap();
        let n = io.read_more().await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&io.read_buf[..], b"hello");
    }

    #[tokio::test]
    async fn prefixed_io_yields_the_prefix_before_the_underlying_stream() {
        let (mut client, server) = duplex(64);
        client.write_all(b"world").await.unwrap();
        let mut io = PrefixedIo::new(BytesMut::from(&b"hello "[..]), server);
        let mut out = [0u8; 11];
        io.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[tokio::test]
    async fn queue_write_then_flush_sends_bytes() {
        let (mut client, server) = duplex(64);
        let mut io = BufferedIo::new(server);
        io.queue_write(b"abc");
        io.flush().await.unwrap();
        let mut out = [0u8; 3];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"abc");
    }
}
