//! Intercepting HTTP/HTTPS forward proxy.
//!
//! This module provides:
//! - Plain HTTP forwarding for absolute-URI requests
//! - HTTP CONNECT handling, either as an opaque tunnel or with TLS
//!   interception (MITM)
//! - Per-host certificate caching for the intercepted identities
//! - A hook pipeline to rewrite requests, replace the send operation and
//!   rewrite responses
//!
//! # Architecture
//!
//! ```text
//!  client ──► ProxyServer ──┬── GET http://…      ──► hooks ──► Outbound ──► origin
//!                           ├── CONNECT (tunnel)  ──► byte relay ──────────► origin
//!                           └── CONNECT (MITM)    ──► TLS accept
//!                                                      └─► hooks ──► Outbound ──► origin (TLS)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kproxy::ca::CertificateAuthority;
//! use kproxy::proxy::{Hooks, HttpClient, ProxyServer};
//! use std::sync::Arc;
//!
//! let ca = Arc::new(CertificateAuthority::load(&cert_path, &key_path)?);
//!
//! let server = ProxyServer::builder()
//!     .mitm(true)
//!     .issuer(ca)
//!     .client(HttpClient::new()?)
//!     .hooks(Hooks::tagging())
//!     .build()?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run("127.0.0.1:8080".parse()?, shutdown_rx).await?;
//! ```

pub mod body;
pub mod client;
mod connect;
pub mod error;
pub mod headers;
pub mod hooks;
mod http;
mod mitm;
mod rewind;
pub mod server;
pub mod tls;
pub mod tunnel;

// Re-export main types for convenient access
pub use body::{ProxyBody, ProxyRequest, ProxyResponse};
pub use client::HttpClient;
pub use error::{ProxyError, ProxyResult};
pub use hooks::{Hooks, Outbound, RequestHook, ResponseHook};
pub use server::{ProxyServer, ProxyServerBuilder};
pub use tls::CertificateCache;
