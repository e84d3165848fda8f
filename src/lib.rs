//! kproxy: intercepting HTTP/HTTPS forward proxy
//!
//! This crate provides a forward proxy that forwards plain HTTP requests,
//! tunnels HTTPS through CONNECT, and optionally terminates TLS itself
//! (MITM mode) to inspect and rewrite decrypted traffic, impersonating
//! origins with certificates issued by a local CA.
//!
//! # Architecture
//!
//! - **Proxy**: Connection handling, CONNECT tunneling, MITM sessions and
//!   the request/response hook pipeline
//! - **CA**: Root CA loading/generation and per-host certificate issuance
//! - **Telemetry**: Injectable traffic logger with pluggable sinks
//! - **Config**: TOML configuration merged with CLI flags

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ca;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod orchestrator;
pub mod proxy;
pub mod telemetry;
