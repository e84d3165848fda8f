//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while recording traffic events.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to serialize event to JSON.
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write an event to its sink.
    #[error("Failed to write traffic log: {0}")]
    Write(#[from] std::io::Error),

    /// Failed to open the traffic log file.
    #[error("Failed to open traffic log {path}: {source}")]
    Open {
        /// Path that could not be opened.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
