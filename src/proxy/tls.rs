//! TLS plumbing for the MITM proxy.
//!
//! This module provides:
//! - A per-hostname certificate cache with single-flight issuance
//! - TLS acceptor for client connections (proxy as server)
//! - TLS client configurations for origin connections (proxy as client)
//!
//! # ALPN
//!
//! Both sides advertise only `http/1.1`. The MITM session speaks HTTP/1
//! to the client, so a client must never be allowed to negotiate H2.
//!
//! # Cache growth
//!
//! Issued certificates are kept for the lifetime of the cache, even past
//! their validity window. A process that intercepts many distinct
//! hostnames accumulates one entry per hostname.

use super::error::{ProxyError, ProxyResult};
use crate::ca::{IssueCertificate, IssuedCertificate};
use dashmap::DashMap;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, trace};

/// Validity window of issued leaf certificates, in days.
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Certificate cache for TLS interception.
///
/// Holds at most one identity per (lowercased) hostname. Concurrent misses
/// for the same hostname wait on a single issuance; a failed issuance
/// leaves the slot empty so a later request can retry.
pub struct CertificateCache {
    /// Hostname -> identity slot.
    entries: DashMap<String, Arc<OnceCell<Arc<CertifiedKey>>>>,
    /// Collaborator issuing new certificates.
    issuer: Arc<dyn IssueCertificate>,
}

impl CertificateCache {
    /// Create an empty cache issuing through `issuer`.
    pub fn new(issuer: Arc<dyn IssueCertificate>) -> Self {
        Self {
            entries: DashMap::new(),
            issuer,
        }
    }

    /// Get the identity for `hostname`, issuing one on first use.
    pub async fn resolve(&self, hostname: &str) -> ProxyResult<Arc<CertifiedKey>> {
        let key = hostname.to_ascii_lowercase();
        let slot = self.entries.entry(key.clone()).or_default().clone();

        if let Some(identity) = slot.get() {
            trace!("Certificate cache hit for {}", key);
            return Ok(identity.clone());
        }

        let identity = slot.get_or_try_init(|| self.issue(key)).await?;
        Ok(identity.clone())
    }

    async fn issue(&self, hostname: String) -> ProxyResult<Arc<CertifiedKey>> {
        debug!("Issuing certificate for {}", hostname);

        let issuer = self.issuer.clone();
        let issued = tokio::task::spawn_blocking(move || {
            issuer.issue(&[hostname.as_str()], CERT_VALIDITY_DAYS)
        })
        .await
        .map_err(|e| ProxyError::Tls(format!("Certificate issuance task failed: {}", e)))??;

        certified_key(&issued).map(Arc::new)
    }

    /// Drop every cached identity.
    pub fn clear(&self) {
        self.entries.clear();
        debug!("Certificate cache cleared");
    }

    /// Get the number of cached identities.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Turn a PEM certificate and key into a rustls identity.
fn certified_key(issued: &IssuedCertificate) -> ProxyResult<CertifiedKey> {
    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut issued.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

    if cert_chain.is_empty() {
        return Err(ProxyError::Tls("No certificates found in PEM".into()));
    }

    let private_key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut issued.key_pem.as_bytes())
            .map_err(|e| ProxyError::Tls(format!("Failed to parse private key PEM: {}", e)))?
            .ok_or_else(|| ProxyError::Tls("No private key found in PEM".into()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
        .map_err(|e| ProxyError::Tls(format!("Failed to create signing key: {}", e)))?;

    Ok(CertifiedKey::new(cert_chain, signing_key))
}

/// Presents one pre-resolved identity regardless of SNI.
#[derive(Debug)]
struct FixedCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Create a TLS acceptor that impersonates a host with `identity`.
pub fn create_tls_acceptor(identity: Arc<CertifiedKey>) -> TlsAcceptor {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(FixedCertResolver(identity)));

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    TlsAcceptor::from(Arc::new(config))
}

/// Client configuration verifying origins against system root CAs.
pub fn native_client_config() -> ProxyResult<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();

    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }

    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    if root_store.is_empty() {
        return Err(ProxyError::Tls("No system root certificates found".into()));
    }

    debug!("Loaded {} root certificates", root_store.len());

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

/// Client configuration that accepts any origin certificate.
pub fn insecure_client_config() -> ClientConfig {
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

/// Create a TLS connector from a client configuration.
pub fn create_tls_connector(config: Arc<ClientConfig>) -> TlsConnector {
    TlsConnector::from(config)
}

/// Convert a domain string to a ServerName for TLS connection.
pub fn domain_to_server_name(domain: &str) -> ProxyResult<ServerName<'static>> {
    ServerName::try_from(domain.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", domain)))
}

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
