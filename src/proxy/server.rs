//! HTTP proxy server implementation.
//!
//! This module provides the main proxy server that:
//! - Listens for client connections on TCP
//! - Logs every inbound request through the traffic logger
//! - Handles HTTP CONNECT as an opaque tunnel or a MITM session
//! - Forwards plain HTTP requests through the hook pipeline
//!
//! # Architecture
//!
//! The proxy uses hyper's HTTP/1.1 server with upgrade support for CONNECT.
//! Each connection is handled in a separate Tokio task; one failing
//! connection never affects the others.
//!
//! # Example
//!
//! ```ignore
//! use kproxy::proxy::{HttpClient, ProxyServer};
//!
//! let server = ProxyServer::builder()
//!     .client(HttpClient::new()?)
//!     .build()?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let listener = ProxyServer::bind("127.0.0.1:8080".parse()?).await?;
//! server.serve(listener, shutdown_rx).await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::body::{ProxyRequest, ProxyResponse};
use super::client::HttpClient;
use super::connect::handle_connect;
use super::error::{ProxyError, ProxyResult};
use super::hooks::{Hooks, Outbound, RequestHook, ResponseHook};
use super::http::handle_http;
use super::tls::CertificateCache;
use crate::ca::IssueCertificate;
use crate::telemetry::{TrafficEvent, TrafficLogger};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// State shared by every connection handler of one server.
pub(crate) struct ProxyState {
    /// Whether CONNECT requests are intercepted.
    pub(crate) mitm: bool,
    /// Default send capability.
    pub(crate) client: Arc<dyn Outbound>,
    /// Identities for intercepted hosts, present when an issuer was given.
    pub(crate) certs: Option<Arc<CertificateCache>>,
    pub(crate) hooks: Hooks,
    pub(crate) logger: Arc<TrafficLogger>,
}

impl ProxyState {
    /// Rewrite `request` and send it, through the override when one is set.
    ///
    /// The rewritten request is logged as it leaves for the origin.
    pub(crate) async fn send(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let request = self.hooks.rewrite_request(request);
        self.logger.log(TrafficEvent::request("outbound", &request, None));
        self.hooks.send(self.client.as_ref(), request).await
    }
}

/// The main proxy server.
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Start building a server.
    pub fn builder() -> ProxyServerBuilder {
        ProxyServerBuilder::new()
    }

    /// Whether CONNECT requests are intercepted.
    pub fn is_mitm(&self) -> bool {
        self.state.mitm
    }

    /// Get a reference to the certificate cache.
    pub fn cert_cache(&self) -> Option<Arc<CertificateCache>> {
        self.state.certs.clone()
    }

    /// Get a reference to the traffic logger.
    pub fn logger(&self) -> Arc<TrafficLogger> {
        self.state.logger.clone()
    }

    /// Bind a TCP listener for [`ProxyServer::serve`].
    pub async fn bind(addr: SocketAddr) -> ProxyResult<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!("Proxy listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind `addr` and serve until shutdown.
    pub async fn run(&self, addr: SocketAddr, shutdown_rx: watch::Receiver<bool>) -> ProxyResult<()> {
        let listener = Self::bind(addr).await?;
        self.serve(listener, shutdown_rx).await
    }

    /// Accept connections from `listener` until the shutdown signal is received.
    ///
    /// Connections already being served keep running in their own tasks.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> ProxyResult<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, remote_addr)) => {
                            debug!("Accepted connection from {}", remote_addr);
                            self.spawn_connection_handler(stream, remote_addr);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream, remote_addr: SocketAddr) {
        let state = self.state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote_addr, state).await {
                if e.is_disconnect() {
                    debug!("Connection from {} ended: {}", remote_addr, e);
                } else {
                    warn!("Connection error from {}: {}", remote_addr, e);
                }
            }
        });
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("mitm", &self.state.mitm)
            .field("hooks", &self.state.hooks)
            .field("logger", &self.state.logger)
            .finish()
    }
}

/// Handle a single client connection.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { dispatch(req, remote_addr, state).await }
    });

    // Serve HTTP/1.1 with support for upgrades (needed for CONNECT)
    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Log a request and route it by method.
async fn dispatch(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<ProxyResponse> {
    state
        .logger
        .log(TrafficEvent::request("inbound", &req, Some(remote_addr)));

    if req.method() == Method::CONNECT {
        handle_connect(req, remote_addr, state).await
    } else {
        handle_http(req, state).await
    }
}

/// Builder for ProxyServer configuration.
#[derive(Default)]
pub struct ProxyServerBuilder {
    mitm: bool,
    issuer: Option<Arc<dyn IssueCertificate>>,
    client: Option<Arc<dyn Outbound>>,
    hooks: Hooks,
    logger: Option<Arc<TrafficLogger>>,
}

impl ProxyServerBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intercept CONNECT requests instead of tunneling them.
    pub fn mitm(mut self, enabled: bool) -> Self {
        self.mitm = enabled;
        self
    }

    /// Set the certificate issuer used for intercepted hosts.
    pub fn issuer(mut self, issuer: Arc<dyn IssueCertificate>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Set the default outbound client.
    ///
    /// Defaults to [`HttpClient::new`].
    pub fn client(mut self, client: impl Outbound + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Set the request rewrite hook.
    pub fn on_request(mut self, hook: impl RequestHook + 'static) -> Self {
        self.hooks = self.hooks.with_request_rewrite(hook);
        self
    }

    /// Replace the outbound send operation.
    pub fn send_with(mut self, send: impl Outbound + 'static) -> Self {
        self.hooks = self.hooks.with_send_override(send);
        self
    }

    /// Set the response rewrite hook.
    pub fn on_response(mut self, hook: impl ResponseHook + 'static) -> Self {
        self.hooks = self.hooks.with_response_rewrite(hook);
        self
    }

    /// Replace all hooks at once.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the traffic logger. Defaults to a null logger.
    pub fn logger(mut self, logger: Arc<TrafficLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the proxy server.
    ///
    /// Fails when MITM is enabled without an issuer, or when the default
    /// client cannot load the system root certificates.
    pub fn build(self) -> ProxyResult<ProxyServer> {
        if self.mitm && self.issuer.is_none() {
            return Err(ProxyError::Config(
                "MITM mode requires a certificate issuer".into(),
            ));
        }

        let client: Arc<dyn Outbound> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpClient::new()?),
        };

        let state = ProxyState {
            mitm: self.mitm,
            client,
            certs: self
                .issuer
                .map(|issuer| Arc::new(CertificateCache::new(issuer))),
            hooks: self.hooks,
            logger: self
                .logger
                .unwrap_or_else(|| Arc::new(TrafficLogger::new_null())),
        };

        Ok(ProxyServer {
            state: Arc::new(state),
        })
    }
}
