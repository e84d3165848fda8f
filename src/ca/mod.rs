//! Certificate authority used to impersonate origins in MITM mode.
//!
//! The proxy core only needs one capability from this module: issue a
//! certificate for a hostname, signed by a root the client trusts. That
//! capability is the [`IssueCertificate`] trait; [`CertificateAuthority`]
//! is the `rcgen`-backed implementation used by the binary.

mod authority;
mod error;

pub use authority::{CertificateAuthority, IssueCertificate, IssuedCertificate};
pub use error::CaError;
