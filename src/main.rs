//! kproxy: intercepting HTTP/HTTPS forward proxy
//!
//! This is the main entry point for the kproxy binary. It handles CLI argument
//! parsing, configuration loading and tracing initialization, then hands off
//! to the orchestrator.
//!
//! # Output
//!
//! - **Diagnostics** go to stderr through `tracing`, filtered by `-v`
//! - **Traffic events** go to stderr on the `kproxy::traffic` target, or to
//!   the file given with `--traffic-log`

use anyhow::{Context, Result};
use clap::Parser;
use kproxy::{cli::Cli, cli_handler, config::ConfigLoader, orchestrator};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    if let Some(ref command) = cli.command {
        return cli_handler::handle_command(command);
    }

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    orchestrator::run(&cli, &config)
}

/// Initialize the tracing subscriber.
///
/// Traffic events are always let through at info level so the traffic log
/// is visible without `-v`.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors (or `RUST_LOG`)
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,kproxy::traffic=info")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
