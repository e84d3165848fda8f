//! Traffic event types for structured logging.

use chrono::{DateTime, Utc};
use http::{HeaderMap, Request, Response};
use serde::Serialize;
use std::net::SocketAddr;

/// Events recorded while proxying traffic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrafficEvent {
    /// A request was received from, or built on behalf of, a client.
    Request {
        /// Where in the pipeline the request was observed.
        context: String,
        /// HTTP method.
        method: String,
        /// Value of the `Host` header, or the URI authority.
        host: String,
        /// Request target as seen by the proxy.
        url: String,
        /// Protocol version (`HTTP/1.1`).
        version: String,
        /// Address of the client connection, when known.
        remote_addr: Option<String>,
        /// Request headers in wire order.
        headers: Vec<(String, String)>,
    },

    /// A response is about to be returned to the client.
    Response {
        /// Where in the pipeline the response was observed.
        context: String,
        /// Numeric status code.
        status: u16,
        /// Protocol version.
        version: String,
        /// Declared `Content-Length`, if any.
        content_length: Option<u64>,
        /// Response headers in wire order.
        headers: Vec<(String, String)>,
    },

    /// A CONNECT tunnel to an origin was established.
    TunnelOpen {
        /// `host:port` the tunnel connects to.
        target: String,
        /// Address of the origin socket.
        origin_addr: Option<String>,
    },

    /// A CONNECT tunnel finished relaying.
    TunnelClose {
        /// `host:port` the tunnel connected to.
        target: String,
        /// Bytes copied from the client to the origin.
        client_to_origin: u64,
        /// Bytes copied from the origin to the client.
        origin_to_client: u64,
    },

    /// Something went wrong while handling a connection.
    Failure {
        /// Where in the pipeline the failure happened.
        context: String,
        /// Human readable description.
        message: String,
    },
}

impl TrafficEvent {
    /// Build a request event from an HTTP request.
    pub fn request<B>(context: &str, req: &Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        TrafficEvent::Request {
            context: context.to_string(),
            method: req.method().to_string(),
            host,
            url: req.uri().to_string(),
            version: format!("{:?}", req.version()),
            remote_addr: remote_addr.map(|a| a.to_string()),
            headers: header_pairs(req.headers()),
        }
    }

    /// Build a response event from an HTTP response.
    pub fn response<B>(context: &str, resp: &Response<B>) -> Self {
        let content_length = resp
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        TrafficEvent::Response {
            context: context.to_string(),
            status: resp.status().as_u16(),
            version: format!("{:?}", resp.version()),
            content_length,
            headers: header_pairs(resp.headers()),
        }
    }

    /// Build a failure event.
    pub fn failure(context: &str, message: impl ToString) -> Self {
        TrafficEvent::Failure {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// RFC 3339 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a TrafficEvent,
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::builder()
            .method("GET")
            .uri("http://example.com/index.html")
            .header("Host", "example.com")
            .header("User-Agent", "curl/8.0")
            .body(())
            .unwrap();

        let event = TrafficEvent::request("http", &req, Some(([127, 0, 0, 1], 5555).into()));
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"request\""));
        assert!(json.contains("\"method\":\"GET\""));
        assert!(json.contains("\"host\":\"example.com\""));
        assert!(json.contains("\"url\":\"http://example.com/index.html\""));
        assert!(json.contains("\"version\":\"HTTP/1.1\""));
        assert!(json.contains("\"remote_addr\":\"127.0.0.1:5555\""));
        assert!(json.contains("[\"user-agent\",\"curl/8.0\"]"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_request_host_falls_back_to_authority() {
        let req = Request::builder()
            .method("CONNECT")
            .uri("example.com:443")
            .body(())
            .unwrap();

        match TrafficEvent::request("connect", &req, None) {
            TrafficEvent::Request { host, .. } => assert_eq!(host, "example.com:443"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::builder()
            .status(404)
            .header("Content-Length", "12")
            .body(())
            .unwrap();

        let event = TrafficEvent::response("http", &resp);
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"response\""));
        assert!(json.contains("\"status\":404"));
        assert!(json.contains("\"content_length\":12"));
    }

    #[test]
    fn test_tunnel_close_serialization() {
        let event = TrafficEvent::TunnelClose {
            target: "example.com:443".to_string(),
            client_to_origin: 517,
            origin_to_client: 4096,
        };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"tunnel_close\""));
        assert!(json.contains("\"client_to_origin\":517"));
        assert!(json.contains("\"origin_to_client\":4096"));
    }
}
