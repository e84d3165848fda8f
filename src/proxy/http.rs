//! Plain HTTP proxying (non-CONNECT).
//!
//! A forward proxy only serves absolute-URI requests. Each one becomes a
//! single outbound exchange run through the hook pipeline.

use super::body::{error_response, ProxyRequest, ProxyResponse};
use super::error::ProxyResult;
use super::headers::copy_headers_for_proxy;
use super::server::ProxyState;
use crate::telemetry::TrafficEvent;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::{Request, StatusCode, Uri};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle a plain HTTP proxy request.
pub(crate) async fn handle_http(
    req: Request<Incoming>,
    state: Arc<ProxyState>,
) -> ProxyResult<ProxyResponse> {
    if req.uri().scheme().is_none() || req.uri().authority().is_none() {
        debug!("Rejecting non-proxy request for {}", req.uri());
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "Non-proxy request is not supported",
        ));
    }

    let uri = req.uri().clone();
    let outbound = build_outbound(req, uri)?;

    let response = match state.send(outbound).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Upstream request failed: {}", e);
            state.logger.log(TrafficEvent::failure("http", &e));
            return Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()));
        }
    };

    let response = state.hooks.rewrite_response(response);
    state.logger.log(TrafficEvent::response("http", &response));

    Ok(response.map(|body| {
        body.map_err(|e| {
            warn!("Failed to copy response body: {}", e);
            e
        })
        .boxed()
    }))
}

/// Build the request sent to the origin for an inbound request.
///
/// Method, version and body are reused. Headers are copied without the
/// proxy-only ones; `Host` is dropped so the outbound client derives it
/// from `uri`.
pub(crate) fn build_outbound(req: Request<Incoming>, uri: Uri) -> ProxyResult<ProxyRequest> {
    let (parts, body) = req.into_parts();

    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(parts.version)
        .body(body.boxed())?;

    copy_headers_for_proxy(outbound.headers_mut(), &parts.headers);
    outbound.headers_mut().remove(HOST);

    Ok(outbound)
}
