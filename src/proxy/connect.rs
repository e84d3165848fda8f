//! HTTP CONNECT method handling for HTTPS.
//!
//! The flow is:
//!
//! 1. Client sends: `CONNECT api.example.com:443 HTTP/1.1`
//! 2. Without MITM: connect to the origin, return `200`, relay bytes
//! 3. With MITM: resolve an identity for the host, return `200`, then
//!    terminate TLS and serve the decrypted requests
//!
//! Everything that can fail before the tunnel exists (origin connect,
//! certificate issuance) is decided before the `200` is returned, so a
//! failure still reaches the client as an ordinary error response.

use super::body::{empty_body, error_response, ProxyResponse};
use super::error::{ProxyError, ProxyResult};
use super::mitm;
use super::server::ProxyState;
use super::tunnel::relay;
use crate::telemetry::TrafficEvent;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Handle an HTTP CONNECT request.
///
/// Routes to the MITM session when the server intercepts TLS, otherwise
/// to the opaque tunnel.
pub(crate) async fn handle_connect(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<ProxyResponse> {
    let authority = match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "Missing authority in CONNECT request",
            ))
        }
    };

    let (host, port) = match parse_host_port(&authority) {
        Ok(parsed) => parsed,
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string())),
    };

    debug!("CONNECT request to {}:{}", host, port);

    if state.mitm {
        intercept(req, authority, &host, remote_addr, state).await
    } else {
        open_tunnel(req, authority, &host, port, state).await
    }
}

/// Connect to the origin and relay bytes after the upgrade.
async fn open_tunnel(
    req: Request<Incoming>,
    target: String,
    host: &str,
    port: u16,
    state: Arc<ProxyState>,
) -> ProxyResult<ProxyResponse> {
    let origin = match TcpStream::connect((host, port)).await {
        Ok(origin) => origin,
        Err(e) => {
            warn!("Failed to connect to {}: {}", target, e);
            let err = ProxyError::UpstreamConnect {
                addr: target,
                message: e.to_string(),
            };
            state.logger.log(TrafficEvent::failure("tunnel", &err));
            return Ok(error_response(StatusCode::BAD_GATEWAY, "Bad Gateway"));
        }
    };

    state.logger.log(TrafficEvent::TunnelOpen {
        target: target.clone(),
        origin_addr: origin.peer_addr().ok().map(|a| a.to_string()),
    });
    info!("Tunnel established to {}", target);

    let logger = state.logger.clone();
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let stats = relay(TokioIo::new(upgraded), origin).await;
                debug!(
                    "Tunnel closed for {} ({} bytes up, {} bytes down)",
                    target, stats.client_to_origin, stats.origin_to_client
                );
                logger.log(TrafficEvent::TunnelClose {
                    target,
                    client_to_origin: stats.client_to_origin,
                    origin_to_client: stats.origin_to_client,
                });
            }
            Err(e) => {
                warn!("HTTP upgrade failed for {}: {}", target, e);
                let err = ProxyError::UpgradeFailed(e.to_string());
                logger.log(TrafficEvent::failure("tunnel", &err));
            }
        }
    });

    Ok(Response::new(empty_body()))
}

/// Resolve an identity for `host` and serve a MITM session after the upgrade.
async fn intercept(
    req: Request<Incoming>,
    authority: String,
    host: &str,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> ProxyResult<ProxyResponse> {
    let Some(certs) = state.certs.clone() else {
        return Err(ProxyError::Config("MITM enabled without a certificate cache".into()));
    };

    let identity = match certs.resolve(host).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Failed to issue certificate for {}: {}", host, e);
            state.logger.log(TrafficEvent::failure("mitm", &e));
            return Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ));
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let session = mitm::serve_session(
                    TokioIo::new(upgraded),
                    authority.clone(),
                    identity,
                    remote_addr,
                    state.clone(),
                );
                if let Err(e) = session.await {
                    if e.is_disconnect() {
                        debug!("MITM session for {} ended: {}", authority, e);
                    } else {
                        warn!("MITM session for {} failed: {}", authority, e);
                        state.logger.log(TrafficEvent::failure("mitm", &e));
                    }
                }
            }
            Err(e) => {
                warn!("HTTP upgrade failed for {}: {}", authority, e);
                let err = ProxyError::UpgradeFailed(e.to_string());
                state.logger.log(TrafficEvent::failure("mitm", &err));
            }
        }
    });

    Ok(Response::new(empty_body()))
}

/// Parse host:port string from CONNECT authority.
///
/// Examples:
/// - `api.example.com:443` -> ("api.example.com", 443)
/// - `api.example.com` -> ("api.example.com", 443) (default port)
/// - `[::1]:443` -> ("::1", 443)
fn parse_host_port(authority: &str) -> ProxyResult<(String, u16)> {
    let (host, port) = match authority.strip_prefix('[') {
        Some(rest) => {
            let (addr, tail) = rest.split_once(']').ok_or_else(|| {
                ProxyError::InvalidRequest(format!("Unterminated IPv6 literal: {}", authority))
            })?;
            (addr, tail.strip_prefix(':'))
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };

    if host.is_empty() {
        return Err(ProxyError::InvalidRequest(format!(
            "Missing host in CONNECT target: {}",
            authority
        )));
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidRequest(format!("Invalid port: {}", port)))?,
        None => 443,
    };

    Ok((host.to_string(), port))
}
