//! Proxy orchestration.
//!
//! Turns a loaded [`Config`] into a running [`ProxyServer`]:
//!
//! 1. Build the traffic logger (tracing, file, or null)
//! 2. Load the CA when MITM is enabled
//! 3. Build the outbound client and the server
//! 4. Serve on a multi-threaded runtime until Ctrl-C

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::ca::CertificateAuthority;
use crate::cli::Cli;
use crate::config::{Config, LoggingConfig};
use crate::proxy::{Hooks, HttpClient, ProxyServer};
use crate::telemetry::{TracingSink, TrafficLogger, TrafficSink, WriterSink};

/// Run the proxy until interrupted.
pub fn run(cli: &Cli, config: &Config) -> Result<()> {
    let server = build_server(cli, config)?;
    let addr = config.listen_addr()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let listener = ProxyServer::bind(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        });

        server
            .serve(listener, shutdown_rx)
            .await
            .context("Proxy server failed")
    })
}

/// Build the server described by `config`.
pub fn build_server(cli: &Cli, config: &Config) -> Result<ProxyServer> {
    let logger = traffic_logger(&config.logging)?;

    let client = if config.proxy.insecure_upstream {
        info!("Upstream certificate verification is disabled");
        HttpClient::insecure()
    } else {
        HttpClient::new().context("Failed to initialize upstream TLS")?
    };

    let mut builder = ProxyServer::builder()
        .mitm(config.proxy.mitm)
        .client(client)
        .logger(logger);

    if config.proxy.mitm {
        let (Some(cert), Some(key)) = (&config.ca.cert, &config.ca.key) else {
            anyhow::bail!("MITM mode requires both --cacert and --cakey");
        };
        let ca = CertificateAuthority::load(cert, key).with_context(|| {
            format!(
                "Failed to load CA from {} and {}",
                cert.display(),
                key.display()
            )
        })?;
        debug!("Loaded CA from {}", cert.display());
        builder = builder.issuer(Arc::new(ca));
    }

    if cli.tag_headers {
        builder = builder.hooks(Hooks::tagging());
    }

    let server = builder.build().context("Failed to build proxy server")?;
    info!(
        "Proxy configured (mitm: {}, tagging: {})",
        server.is_mitm(),
        cli.tag_headers
    );
    Ok(server)
}

/// Build the traffic logger for the logging settings.
fn traffic_logger(logging: &LoggingConfig) -> Result<Arc<TrafficLogger>> {
    if !logging.traffic_enabled() {
        return Ok(Arc::new(TrafficLogger::new_null()));
    }

    let sink: Arc<dyn TrafficSink> = match &logging.file {
        Some(path) => Arc::new(WriterSink::append_to(path).with_context(|| {
            format!("Failed to open traffic log {}", path.display())
        })?),
        None => Arc::new(TracingSink),
    };

    Ok(Arc::new(TrafficLogger::new(sink)))
}
