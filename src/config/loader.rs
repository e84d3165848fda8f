//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. User config: `~/.config/kproxy/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Scalars set by a later source override earlier ones.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "kproxy";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with a custom user config path (for testing).
    #[must_use]
    pub fn with_user_path(user_path: PathBuf) -> Self {
        Self { user_path }
    }

    /// Load, merge and validate configuration from all sources.
    ///
    /// A missing user config is skipped; a missing `--config` file is an
    /// error. Invalid TOML is an error (fail fast with clear message).
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike the user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        apply_cli(&mut config, cli);
        config.validate()?;

        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply CLI flags on top of the file configuration.
fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(ref port) = cli.port {
        config.proxy.listen = port.clone();
    }
    if cli.mitm {
        config.proxy.mitm = true;
    }
    if cli.insecure {
        config.proxy.insecure_upstream = true;
    }
    if cli.cacert.is_some() {
        config.ca.cert = cli.cacert.clone();
    }
    if cli.cakey.is_some() {
        config.ca.key = cli.cakey.clone();
    }
    if cli.no_traffic_log {
        config.logging.traffic = Some(false);
    }
    if cli.traffic_log.is_some() {
        config.logging.traffic = Some(true);
        config.logging.file = cli.traffic_log.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("kproxy").chain(args.iter().copied()))
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("nonexistent.toml"));

        let config = loader.load(&cli(&[])).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert!(!config.proxy.mitm);
        assert!(config.logging.traffic_enabled());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("config.toml");
        fs::write(
            &user_path,
            r#"
            [proxy]
            listen = "127.0.0.1:3128"

            [ca]
            cert = "/file/ca.crt"
            key = "/file/ca.key"
            "#,
        )
        .unwrap();

        let loader = ConfigLoader::with_user_path(user_path);
        let config = loader
            .load(&cli(&["--port", ":9090", "--mitm", "--cacert", "/cli/ca.crt"]))
            .unwrap();

        assert_eq!(config.proxy.listen, ":9090");
        assert!(config.proxy.mitm);
        assert_eq!(config.ca.cert, Some(PathBuf::from("/cli/ca.crt")));
        assert_eq!(config.ca.key, Some(PathBuf::from("/file/ca.key")));
    }

    #[test]
    fn test_additional_config_file() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[logging]\ntraffic = false\n").unwrap();

        let loader = ConfigLoader::with_user_path(dir.path().join("nonexistent.toml"));
        let config = loader
            .load(&cli(&["--config", extra.to_str().unwrap()]))
            .unwrap();

        assert!(!config.logging.traffic_enabled());
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("nonexistent.toml"));

        let missing = dir.path().join("missing.toml");
        let result = loader.load(&cli(&["--config", missing.to_str().unwrap()]));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("config.toml");
        fs::write(&user_path, "[proxy\nlisten = ").unwrap();

        let loader = ConfigLoader::with_user_path(user_path);
        assert!(matches!(
            loader.load(&cli(&[])),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_mitm_without_ca_fails_validation() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("nonexistent.toml"));

        let result = loader.load(&cli(&["--mitm", "--cacert", "ca.crt"]));
        assert!(matches!(result, Err(ConfigError::MissingCaFiles)));
    }

    #[test]
    fn test_traffic_log_file_from_cli() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("nonexistent.toml"));

        let config = loader
            .load(&cli(&["--traffic-log", "/tmp/traffic.jsonl"]))
            .unwrap();
        assert!(config.logging.traffic_enabled());
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/traffic.jsonl")));

        let config = loader.load(&cli(&["--no-traffic-log"])).unwrap();
        assert!(!config.logging.traffic_enabled());
    }
}
