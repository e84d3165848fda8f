//! Error types for certificate authority operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors related to CA loading and leaf certificate issuance.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Failed to parse CA certificate or key material.
    #[error("Failed to parse {what}: {message}")]
    Parse {
        /// Which artifact could not be parsed.
        what: &'static str,
        /// Description of the parse error.
        message: String,
    },

    /// Failed to read a CA file.
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a CA file.
    #[error("Failed to write file: {0}")]
    WriteFile(#[source] std::io::Error),

    /// No hostnames specified for certificate generation.
    #[error("No hostnames specified for certificate")]
    NoHostnames,

    /// A hostname cannot be encoded as a subject alternative name.
    #[error("Invalid hostname for certificate: {0}")]
    InvalidHostname(String),

    /// Failed to sign certificate.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_error_display() {
        let err = CaError::KeyGeneration("random number generator failed".to_string());
        assert!(err.to_string().contains("random number generator failed"));
    }

    #[test]
    fn test_read_file_error_names_path() {
        let err = CaError::ReadFile {
            path: PathBuf::from("/etc/kproxy/ca.crt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/kproxy/ca.crt"));
        assert!(msg.contains("missing"));
    }
}
