//! Configuration system for kproxy.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. User config: `~/.config/kproxy/config.toml`
//! 2. Additional config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! Every file is optional except one named with `--config`.
//!
//! # Example
//!
//! ```toml
//! [proxy]
//! listen = ":8080"
//! mitm = true
//! insecure_upstream = false
//!
//! [ca]
//! cert = "/etc/kproxy/ca.crt"
//! key = "/etc/kproxy/ca.key"
//!
//! [logging]
//! traffic = true
//! file = "/var/log/kproxy/traffic.jsonl"
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    parse_listen_addr, CaConfig, Config, LoggingConfig, ProxyConfig, DEFAULT_LISTEN,
};
