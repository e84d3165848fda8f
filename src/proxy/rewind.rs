//! Stream wrapper that replays already-read bytes.

use bytes::{Buf, Bytes};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wrapper for [`AsyncRead`]/[`AsyncWrite`] streams that hands out `buf`
/// before reading from `inner` again.
///
/// Writes go straight to the inner stream.
#[derive(Debug)]
pub(crate) struct Rewind<T> {
    inner: T,
    buf: Bytes,
}

impl<T> Rewind<T> {
    pub(crate) fn new(inner: T, buf: Bytes) -> Self {
        Self { inner, buf }
    }

    /// Returns the inner stream and the bytes not read yet.
    pub(crate) fn into_parts(self) -> (T, Bytes) {
        (self.inner, self.buf)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.buf.is_empty() {
            return Pin::new(&mut self.inner).poll_read(cx, buf);
        }

        let n = self.buf.len().min(buf.remaining());
        buf.put_slice(&self.buf[..n]);
        self.buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_replays_buffer_before_inner() {
        let (mut peer, inner) = tokio::io::duplex(64);
        peer.write_all(b" world").await.unwrap();
        drop(peer);

        let mut stream = Rewind::new(inner, Bytes::from_static(b"hello"));
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_into_parts_returns_unread_bytes() {
        let (_peer, inner) = tokio::io::duplex(64);
        let mut stream = Rewind::new(inner, Bytes::from_static(b"abcdef"));

        let mut first = [0u8; 2];
        stream.read_exact(&mut first).await.unwrap();

        let (_inner, rest) = stream.into_parts();
        assert_eq!(&first, b"ab");
        assert_eq!(&rest[..], b"cdef");
    }
}
