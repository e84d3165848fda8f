//! Error types for proxy operations.
//!
//! This module defines structured error types for the proxy:
//! - Client protocol errors (malformed or non-proxy requests)
//! - TLS errors (certificate issuance, handshake)
//! - Upstream errors (connecting to or exchanging with the origin)

use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The client sent a request the proxy cannot serve.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// TLS error during handshake or certificate operations.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate issuance failed.
    #[error("Certificate issuance failed: {0}")]
    CertIssuance(#[from] crate::ca::CaError),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The upstream exchange failed after connecting.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Upgrade to tunnel failed.
    #[error("HTTP upgrade failed: {0}")]
    UpgradeFailed(String),

    /// The server was built with an inconsistent configuration.
    #[error("Invalid proxy configuration: {0}")]
    Config(String),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl From<http::Error> for ProxyError {
    fn from(err: http::Error) -> Self {
        ProxyError::InvalidRequest(err.to_string())
    }
}

impl ProxyError {
    /// Whether this error is an ordinary peer disconnect.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_canceled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_display() {
        let err = ProxyError::InvalidRequest("missing authority".to_string());
        assert!(err.to_string().contains("missing authority"));
    }

    #[test]
    fn test_upstream_connect_error() {
        let err = ProxyError::UpstreamConnect {
            addr: "api.example.com:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("api.example.com:443"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_cert_issuance_conversion() {
        let err: ProxyError = crate::ca::CaError::NoHostnames.into();
        assert!(matches!(err, ProxyError::CertIssuance(_)));
    }

    #[test]
    fn test_disconnect_classification() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(ProxyError::from(reset).is_disconnect());

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!ProxyError::from(refused).is_disconnect());
        assert!(!ProxyError::Tls("bad".into()).is_disconnect());
    }
}
