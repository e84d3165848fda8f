//! Configuration schema definitions.
//!
//! This module defines the structure of the kproxy configuration file.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. User config: `~/.config/kproxy/config.toml`
//! 2. Additional config file (via `--config` flag)
//! 3. CLI flags (highest priority)

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Listen address used when none is configured.
pub const DEFAULT_LISTEN: &str = ":8080";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Proxy listener and behavior.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Certificate authority used in MITM mode.
    #[serde(default)]
    pub ca: CaConfig,

    /// Traffic logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars from `other` override ours when they are set.
    pub fn merge(&mut self, other: Config) {
        self.proxy.merge(other.proxy);
        self.ca.merge(other.ca);
        self.logging.merge(other.logging);
    }

    /// Check that the configuration can be used to start a proxy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.mitm && (self.ca.cert.is_none() || self.ca.key.is_none()) {
            return Err(ConfigError::MissingCaFiles);
        }
        self.listen_addr()?;
        Ok(())
    }

    /// The socket address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = if self.proxy.listen.is_empty() {
            DEFAULT_LISTEN
        } else {
            self.proxy.listen.as_str()
        };
        parse_listen_addr(listen)
    }
}

/// Proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Listen address (`:8080`, `127.0.0.1:8080`, `[::1]:8080`).
    #[serde(default)]
    pub listen: String,

    /// Terminate TLS for CONNECT requests instead of tunneling.
    #[serde(default)]
    pub mitm: bool,

    /// Skip certificate verification for origin servers.
    #[serde(default)]
    pub insecure_upstream: bool,
}

impl ProxyConfig {
    fn merge(&mut self, other: ProxyConfig) {
        // Scalars are overridden if non-default
        if !other.listen.is_empty() {
            self.listen = other.listen;
        }
        if other.mitm {
            self.mitm = true;
        }
        if other.insecure_upstream {
            self.insecure_upstream = true;
        }
    }
}

/// CA file locations.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CaConfig {
    /// PEM certificate of the CA.
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// PEM private key of the CA.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl CaConfig {
    fn merge(&mut self, other: CaConfig) {
        if other.cert.is_some() {
            self.cert = other.cert;
        }
        if other.key.is_some() {
            self.key = other.key;
        }
    }
}

/// Traffic log settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoggingConfig {
    /// Whether traffic events are recorded. Defaults to on.
    #[serde(default)]
    pub traffic: Option<bool>,

    /// File to append traffic events to, instead of the tracing output.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn merge(&mut self, other: LoggingConfig) {
        if other.traffic.is_some() {
            self.traffic = other.traffic;
        }
        if other.file.is_some() {
            self.file = other.file;
        }
    }

    /// Whether traffic events are recorded.
    pub fn traffic_enabled(&self) -> bool {
        self.traffic.unwrap_or(true)
    }
}

/// Parse a listen address.
///
/// Accepts `:PORT` or a bare `PORT` for all interfaces, `HOST:PORT` and
/// `[V6]:PORT`. Host names are resolved and the first address is used.
pub fn parse_listen_addr(listen: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: "proxy.listen".to_string(),
        message,
    };

    let port_only = listen.strip_prefix(':').unwrap_or(listen);
    if let Ok(port) = port_only.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    if let Ok(addr) = listen.parse::<SocketAddr>() {
        return Ok(addr);
    }

    listen
        .to_socket_addrs()
        .map_err(|e| invalid(format!("{}: {}", listen, e)))?
        .next()
        .ok_or_else(|| invalid(format!("{} did not resolve to an address", listen)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            parse_listen_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("9000").unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:3128").unwrap(),
            "127.0.0.1:3128".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("[::1]:3128").unwrap(),
            "[::1]:3128".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_listen_addr_invalid() {
        assert!(parse_listen_addr(":99999").is_err());
        assert!(parse_listen_addr("not an address").is_err());
    }

    #[test]
    fn test_default_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert!(config.logging.traffic_enabled());
    }

    #[test]
    fn test_mitm_requires_ca_files() {
        let mut config = Config::default();
        config.proxy.mitm = true;
        config.ca.cert = Some(PathBuf::from("ca.crt"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingCaFiles)));

        config.ca.key = Some(PathBuf::from("ca.key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [proxy]
            listen = "127.0.0.1:9999"
            mitm = true

            [ca]
            cert = "/etc/kproxy/ca.crt"
            key = "/etc/kproxy/ca.key"

            [logging]
            traffic = false
            "#,
        )
        .unwrap();

        assert!(config.proxy.mitm);
        assert!(!config.proxy.insecure_upstream);
        assert_eq!(config.ca.cert, Some(PathBuf::from("/etc/kproxy/ca.crt")));
        assert!(!config.logging.traffic_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_overrides_set_scalars() {
        let mut base: Config = toml::from_str(
            r#"
            [proxy]
            listen = ":8080"
            [logging]
            traffic = false
            "#,
        )
        .unwrap();

        let overlay: Config = toml::from_str(
            r#"
            [proxy]
            listen = ":9090"
            insecure_upstream = true
            "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.proxy.listen, ":9090");
        assert!(base.proxy.insecure_upstream);
        assert_eq!(base.logging.traffic, Some(false));
    }
}
