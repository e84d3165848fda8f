//! Command-line interface definitions for kproxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Intercepting HTTP/HTTPS forward proxy.
///
/// kproxy forwards plain HTTP requests, tunnels CONNECT requests, and with
/// --mitm terminates TLS using certificates issued by a local CA so traffic
/// can be inspected and rewritten.
#[derive(Parser, Debug)]
#[command(name = "kproxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to run the proxy).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address to listen on.
    ///
    /// Accepts `:PORT` (all interfaces), `HOST:PORT` or `[V6]:PORT`.
    /// Defaults to `:8080`, or the `proxy.listen` config value.
    #[arg(long = "port", value_name = "ADDR")]
    pub port: Option<String>,

    /// Intercept HTTPS (requires --cacert and --cakey).
    #[arg(long = "mitm")]
    pub mitm: bool,

    /// CA certificate (PEM) used to sign intercepted identities.
    #[arg(long = "cacert", value_name = "PATH")]
    pub cacert: Option<PathBuf>,

    /// CA private key (PEM) matching --cacert.
    #[arg(long = "cakey", value_name = "PATH")]
    pub cakey: Option<PathBuf>,

    /// Path to a TOML config file.
    ///
    /// CLI flags take priority over values from the file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip certificate verification for origin servers.
    #[arg(long = "insecure")]
    pub insecure: bool,

    /// Disable the traffic log.
    #[arg(long = "no-traffic-log", conflicts_with = "traffic_log")]
    pub no_traffic_log: bool,

    /// Append traffic events as JSON lines to a file instead of stderr.
    #[arg(long = "traffic-log", value_name = "PATH")]
    pub traffic_log: Option<PathBuf>,

    /// Tag proxied traffic with X-KPROXY-REQUEST / X-KPROXY-RESPONSE headers.
    #[arg(long = "tag-headers")]
    pub tag_headers: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for kproxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new root CA for use with --mitm.
    ///
    /// Writes `ca.crt` and `ca.key` (mode 0600) into the output directory.
    #[command(name = "generate-ca")]
    GenerateCa {
        /// Directory to write the CA files to.
        #[arg(long = "out-dir", value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,
    },
}
