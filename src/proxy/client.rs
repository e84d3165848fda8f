//! Default outbound client.
//!
//! Opens a fresh connection per request (no pooling) and speaks HTTP/1 to
//! the origin, over TLS when the URL scheme is `https`.

use super::body::{ProxyRequest, ProxyResponse};
use super::error::{ProxyError, ProxyResult};
use super::headers::parse_hostname;
use super::hooks::{Outbound, OutboundFuture};
use super::tls::{
    create_tls_connector, domain_to_server_name, insecure_client_config, native_client_config,
};
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, HOST};
use hyper::http::uri::PathAndQuery;
use hyper::Uri;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Where an absolute request URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    /// Host without brackets, suitable for DNS and SNI.
    host: String,
    port: u16,
    tls: bool,
}

impl Target {
    fn from_uri(uri: &Uri) -> ProxyResult<Self> {
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => {
                return Err(ProxyError::InvalidRequest(format!(
                    "Unsupported scheme: {}",
                    other
                )))
            }
            None => {
                return Err(ProxyError::InvalidRequest(format!(
                    "Request URL is not absolute: {}",
                    uri
                )))
            }
        };

        let host = uri
            .host()
            .ok_or_else(|| ProxyError::InvalidRequest(format!("Missing host in URL: {}", uri)))?;

        Ok(Self {
            host: parse_hostname(host).to_string(),
            port: uri.port_u16().unwrap_or(if tls { 443 } else { 80 }),
            tls,
        })
    }

    fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// HTTP/1 client used when no send override is installed.
#[derive(Clone)]
pub struct HttpClient {
    tls: TlsConnector,
}

impl HttpClient {
    /// Client verifying origins against the system root certificates.
    pub fn new() -> ProxyResult<Self> {
        Ok(Self::with_tls_config(Arc::new(native_client_config()?)))
    }

    /// Client that accepts any origin certificate.
    pub fn insecure() -> Self {
        Self::with_tls_config(Arc::new(insecure_client_config()))
    }

    /// Client using a caller-provided TLS configuration.
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls: create_tls_connector(config),
        }
    }

    /// Send `request` to the origin named by its absolute URL.
    pub async fn send_request(&self, mut request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let target = Target::from_uri(request.uri())?;

        if !request.headers().contains_key(HOST) {
            if let Some(authority) = request.uri().authority() {
                let value = HeaderValue::from_str(authority.as_str())
                    .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
                request.headers_mut().insert(HOST, value);
            }
        }

        let path = request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        *request.uri_mut() = Uri::from(path);

        let addr = target.addr();
        debug!("Connecting to upstream {}", addr);

        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr: addr.clone(),
                message: e.to_string(),
            })?;

        if target.tls {
            let server_name = domain_to_server_name(&target.host)?;
            let stream = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| ProxyError::Tls(format!("Upstream TLS handshake failed: {}", e)))?;
            exchange(stream, request).await
        } else {
            exchange(tcp, request).await
        }
    }
}

impl Outbound for HttpClient {
    fn send(&self, request: ProxyRequest) -> OutboundFuture {
        let client = self.clone();
        Box::pin(async move { client.send_request(request).await })
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

/// Run one request/response exchange over an established stream.
async fn exchange<S>(stream: S, request: ProxyRequest) -> ProxyResult<ProxyResponse>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut builder = hyper::client::conn::http1::Builder::new();
    builder.preserve_header_case(true).title_case_headers(true);

    let (mut sender, conn) = builder
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection ended: {}", e);
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    Ok(response.map(|body| body.boxed()))
}
