//! TLS-terminating session over a hijacked CONNECT tunnel.
//!
//! The client already holds a `200` for its CONNECT. The session performs
//! the server side of the TLS handshake with the identity resolved for the
//! target host, then serves the decrypted HTTP/1 requests one at a time
//! until the client closes the stream.
//!
//! Every response is re-framed as chunked and marked `Connection: close`,
//! so the client never relies on the origin's length framing.

use super::body::ProxyResponse;
use super::error::{ProxyError, ProxyResult};
use super::http::build_outbound;
use super::rewind::Rewind;
use super::server::ProxyState;
use super::tls::create_tls_acceptor;
use crate::telemetry::TrafficEvent;
use bytes::{Bytes, BytesMut};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use rustls::sign::CertifiedKey;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Serve one MITM session on `stream` until the client goes away.
///
/// `authority` is the CONNECT target, used when a request carries no
/// `Host` header.
///
/// Every response carries `Connection: close`, which makes hyper end its
/// connection after one exchange. The session keeps reading anyway: each
/// round serves one request on a fresh hyper connection over the same TLS
/// stream, replaying whatever the previous round had already buffered.
pub(crate) async fn serve_session<S>(
    stream: S,
    authority: String,
    identity: Arc<CertifiedKey>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let tls = create_tls_acceptor(identity)
        .accept(stream)
        .await
        .map_err(|e| ProxyError::Tls(format!("Client TLS handshake failed: {}", e)))?;

    debug!("TLS established with client for {}", authority);

    let exchanges = Arc::new(AtomicUsize::new(0));
    let mut service = {
        let authority = Arc::new(authority.clone());
        let exchanges = exchanges.clone();
        service_fn(move |req: Request<Incoming>| {
            exchanges.fetch_add(1, Ordering::Relaxed);
            let authority = authority.clone();
            let state = state.clone();
            async move { forward(req, &authority, remote_addr, &state).await }
        })
    };
    let mut io = Rewind::new(tls, Bytes::new());

    loop {
        let served = exchanges.load(Ordering::Relaxed);

        let parts = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(io), service)
            .without_shutdown()
            .await?;

        let (mut tls, unread) = parts.io.into_inner().into_parts();

        if exchanges.load(Ordering::Relaxed) == served {
            debug!("MITM session for {} closed by client", authority);
            let _ = tls.shutdown().await;
            return Ok(());
        }

        io = Rewind::new(tls, replay_buffer(parts.read_buf, unread));
        service = parts.service;
    }
}

/// Bytes hyper buffered but did not parse, followed by bytes it never read.
fn replay_buffer(read_buf: Bytes, unread: Bytes) -> Bytes {
    if unread.is_empty() {
        return read_buf;
    }
    if read_buf.is_empty() {
        return unread;
    }

    let mut buf = BytesMut::with_capacity(read_buf.len() + unread.len());
    buf.extend_from_slice(&read_buf);
    buf.extend_from_slice(&unread);
    buf.freeze()
}

/// Forward one decrypted request to the origin over HTTPS.
///
/// A send failure is returned as an error, which ends the session.
async fn forward(
    req: Request<Incoming>,
    authority: &str,
    remote_addr: SocketAddr,
    state: &ProxyState,
) -> ProxyResult<ProxyResponse> {
    state
        .logger
        .log(TrafficEvent::request("mitm", &req, Some(remote_addr)));

    let uri = origin_url(&req, authority)?;
    let outbound = build_outbound(req, uri)?;

    let response = match state.send(outbound).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Upstream request for {} failed: {}", authority, e);
            state.logger.log(TrafficEvent::failure("mitm", &e));
            return Err(e);
        }
    };

    let response = state.hooks.rewrite_response(force_chunked(response));
    state.logger.log(TrafficEvent::response("mitm", &response));

    Ok(response)
}

/// Rebuild the absolute `https` URL of a decrypted request.
fn origin_url<B>(req: &Request<B>, authority: &str) -> ProxyResult<Uri> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(authority);

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("https://{}{}", host, path)
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidRequest(format!("Invalid request URL: {}", e)))
}

/// Drop the origin's length framing and close after this exchange.
fn force_chunked(mut response: ProxyResponse) -> ProxyResponse {
    let headers = response.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::body::full_body;
    use hyper::Response;

    #[test]
    fn test_origin_url_prefers_host_header() {
        let req = Request::builder()
            .uri("/search?q=rust")
            .header("Host", "www.example.com:8443")
            .body(())
            .unwrap();

        let uri = origin_url(&req, "example.com:443").unwrap();
        assert_eq!(uri.to_string(), "https://www.example.com:8443/search?q=rust");
    }

    #[test]
    fn test_origin_url_falls_back_to_connect_target() {
        let req = Request::builder().uri("/").body(()).unwrap();

        let uri = origin_url(&req, "example.com:443").unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.host(), Some("example.com"));
        assert_eq!(uri.path(), "/");
    }

    #[test]
    fn test_replay_buffer_keeps_order() {
        let joined = replay_buffer(Bytes::from_static(b"GET /a"), Bytes::from_static(b" HTTP/1.1"));
        assert_eq!(&joined[..], b"GET /a HTTP/1.1");
        assert_eq!(&replay_buffer(Bytes::new(), Bytes::from_static(b"x"))[..], b"x");
        assert!(replay_buffer(Bytes::new(), Bytes::new()).is_empty());
    }

    #[test]
    fn test_force_chunked() {
        let resp = Response::builder()
            .header("Content-Length", "5")
            .header("Connection", "keep-alive")
            .body(full_body("hello"))
            .unwrap();

        let resp = force_chunked(resp);
        assert!(resp.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(resp.headers()[TRANSFER_ENCODING], "chunked");
        assert_eq!(resp.headers()[CONNECTION], "close");
    }
}
