//! Root CA loading and per-host leaf certificate issuance.
//!
//! # Example
//!
//! ```ignore
//! use kproxy::ca::{CertificateAuthority, IssueCertificate};
//!
//! let ca = CertificateAuthority::load("ca.crt".as_ref(), "ca.key".as_ref())?;
//! let leaf = ca.issue(&["api.example.com"], 365)?;
//! ```

use super::error::CaError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Validity of a freshly generated root CA (ten years).
const ROOT_VALIDITY_DAYS: i64 = 3650;

/// Capability to issue a leaf certificate for a set of hostnames.
///
/// The proxy core depends on this trait only, so tests and embedders can
/// plug in their own issuer.
pub trait IssueCertificate: Send + Sync {
    /// Issue a certificate valid for `hostnames` for `validity_days` days.
    fn issue(&self, hostnames: &[&str], validity_days: i64) -> Result<IssuedCertificate, CaError>;
}

/// Certificate generated for a specific set of hostnames.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// A root CA able to sign leaf certificates.
pub struct CertificateAuthority {
    /// Signs leaf certificates; owns the CA key pair.
    issuer: Issuer<'static, KeyPair>,
    /// PEM-encoded CA private key.
    ca_key_pem: String,
    /// PEM-encoded CA certificate.
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Generate a new in-memory root CA.
    pub fn generate() -> Result<Self, CaError> {
        info!("Generating root CA certificate");

        let ca_key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut ca_params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("kproxy Root CA".to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("kproxy".to_string()),
        );
        ca_params.distinguished_name = dn;

        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        ca_params.not_before = now;
        ca_params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);

        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key_pair)
            .map_err(|e| CaError::CertGeneration(e.to_string()))?;

        Ok(Self {
            ca_key_pem: ca_key_pair.serialize_pem(),
            ca_cert_pem: ca_cert.pem(),
            issuer: Issuer::new(ca_params, ca_key_pair),
        })
    }

    /// Load a root CA from PEM files on disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|source| CaError::ReadFile {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let key_pem = fs::read_to_string(key_path).map_err(|source| CaError::ReadFile {
            path: key_path.to_path_buf(),
            source,
        })?;

        let ca = Self::from_pem(&cert_pem, &key_pem)?;
        info!("Loaded root CA from {:?}", cert_path);
        Ok(ca)
    }

    /// Build a root CA from PEM-encoded certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let ca_key_pair = KeyPair::from_pem(key_pem).map_err(|e| CaError::Parse {
            what: "CA private key",
            message: e.to_string(),
        })?;
        let ca_key_pem = ca_key_pair.serialize_pem();
        let issuer = Issuer::from_ca_cert_pem(cert_pem, ca_key_pair).map_err(|e| {
            CaError::Parse {
                what: "CA certificate",
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            issuer,
            ca_key_pem,
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// Write the CA certificate and private key to disk.
    ///
    /// The key file is created with 0600 permissions.
    pub fn save(&self, cert_path: &Path, key_path: &Path) -> Result<(), CaError> {
        fs::write(cert_path, &self.ca_cert_pem).map_err(CaError::WriteFile)?;
        write_restricted_file(key_path, &self.ca_key_pem)?;
        debug!("Root CA written: cert={:?}, key={:?}", cert_path, key_path);
        Ok(())
    }

    /// Get CA certificate as PEM string.
    pub fn cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }
}

impl IssueCertificate for CertificateAuthority {
    fn issue(&self, hostnames: &[&str], validity_days: i64) -> Result<IssuedCertificate, CaError> {
        let Some(first) = hostnames.first() else {
            return Err(CaError::NoHostnames);
        };

        debug!("Issuing certificate for {:?}", hostnames);

        let leaf_key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::KeyGeneration(e.to_string()))?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(first.to_string()));
        params.distinguished_name = dn;

        params.subject_alt_names = hostnames
            .iter()
            .map(|host| subject_alt_name(host))
            .collect::<Result<_, _>>()?;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(validity_days);

        let leaf_cert = params
            .signed_by(&leaf_key_pair, &self.issuer)
            .map_err(|e| CaError::Signing(e.to_string()))?;

        Ok(IssuedCertificate {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key_pair.serialize_pem(),
        })
    }
}

/// IP literals become IP SANs, everything else a DNS SAN.
fn subject_alt_name(host: &str) -> Result<SanType, CaError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let name = host
        .try_into()
        .map_err(|_| CaError::InvalidHostname(host.to_string()))?;
    Ok(SanType::DnsName(name))
}

/// Write a file with restricted permissions (0600).
fn write_restricted_file(path: &Path, content: &str) -> Result<(), CaError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(CaError::WriteFile)?;

    file.write_all(content.as_bytes())
        .map_err(CaError::WriteFile)?;

    Ok(())
}
