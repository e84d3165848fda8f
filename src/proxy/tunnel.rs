//! Opaque byte relay for CONNECT tunnels.
//!
//! Each direction runs in its own task. When a direction sees end of
//! stream on its source it shuts down the write side of its destination,
//! so the peer learns about the half-close. The relay only returns once
//! both directions are done, which lets a download keep draining after the
//! client has stopped sending.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

/// Byte counts of a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the client to the origin.
    pub client_to_origin: u64,
    /// Bytes copied from the origin to the client.
    pub origin_to_client: u64,
}

/// Copy bytes between `client` and `origin` until both directions finish.
///
/// Both streams are dropped, and therefore closed, before this returns.
pub async fn relay<C, O>(client: C, origin: O) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    O: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (origin_read, origin_write) = tokio::io::split(origin);

    let upstream = tokio::spawn(copy_half(client_read, origin_write, "client->origin"));
    let downstream = tokio::spawn(copy_half(origin_read, client_write, "origin->client"));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    let mut stats = RelayStats::default();

    match upstream {
        Ok((copied, _client_read, _origin_write)) => stats.client_to_origin = copied,
        Err(e) => debug!("client->origin task failed: {}", e),
    }
    match downstream {
        Ok((copied, _origin_read, _client_write)) => stats.origin_to_client = copied,
        Err(e) => debug!("origin->client task failed: {}", e),
    }

    stats
}

/// Copy one direction, then half-close the destination.
///
/// The halves are handed back so the caller decides when the sockets close.
async fn copy_half<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    direction: &'static str,
) -> (u64, ReadHalf<R>, WriteHalf<W>)
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            debug!("{} copy ended: {}", direction, e);
            0
        }
    };

    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown failed: {}", direction, e);
    }

    (copied, reader, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_relay_copies_both_ways_until_both_close() {
        let (mut client, client_proxy) = tokio::io::duplex(1024);
        let (mut origin, origin_proxy) = tokio::io::duplex(1024);

        let handle = tokio::spawn(relay(client_proxy, origin_proxy));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        origin.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        origin.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        // Client stops sending; the origin sees the half-close.
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        origin.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        // The origin can still finish its download.
        origin.write_all(b"tail").await.unwrap();
        origin.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"tail");

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            RelayStats {
                client_to_origin: 5,
                origin_to_client: 10,
            }
        );
    }

    #[tokio::test]
    async fn test_relay_returns_when_peers_drop() {
        let (client, client_proxy) = tokio::io::duplex(64);
        let (origin, origin_proxy) = tokio::io::duplex(64);

        let handle = tokio::spawn(relay(client_proxy, origin_proxy));
        drop(client);
        drop(origin);

        let stats = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats::default());
    }
}
