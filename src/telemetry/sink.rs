//! Traffic logger and its sinks.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{error, info};

use super::error::TelemetryError;
use super::events::{TimestampedEvent, TrafficEvent};

/// `tracing` target used by [`TracingSink`].
pub const TRAFFIC_TARGET: &str = "kproxy::traffic";

/// Destination for recorded traffic events.
pub trait TrafficSink: Send + Sync {
    /// Record one timestamped event.
    fn record(&self, event: &TimestampedEvent<'_>) -> Result<(), TelemetryError>;
}

/// Sink that emits each event as a JSON line through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TrafficSink for TracingSink {
    fn record(&self, event: &TimestampedEvent<'_>) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(event)?;
        info!(target: TRAFFIC_TARGET, "{}", json);
        Ok(())
    }
}

/// Sink that appends JSON lines to a writer (usually a file).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl WriterSink<std::fs::File> {
    /// Open (or create) `path` in append mode.
    pub fn append_to(path: &Path) -> Result<Self, TelemetryError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| TelemetryError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> TrafficSink for WriterSink<W> {
    fn record(&self, event: &TimestampedEvent<'_>) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

/// Gate in front of a traffic sink.
///
/// Logging is a no-op unless the logger is enabled and a sink is set. The
/// logger is shared (`Arc`) between every connection handler of a server.
pub struct TrafficLogger {
    enabled: AtomicBool,
    sink: RwLock<Option<Arc<dyn TrafficSink>>>,
}

impl TrafficLogger {
    /// Create an enabled logger writing to `sink`.
    pub fn new(sink: Arc<dyn TrafficSink>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            sink: RwLock::new(Some(sink)),
        }
    }

    /// Create a null logger that discards all events.
    pub fn new_null() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sink: RwLock::new(None),
        }
    }

    /// Enable or disable recording.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether events are currently recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Replace the sink and enable recording.
    pub fn set_sink(&self, sink: Arc<dyn TrafficSink>) {
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        self.set_enabled(true);
    }

    /// Record an event.
    ///
    /// Sink failures are reported through `tracing` and otherwise ignored.
    pub fn log(&self, event: TrafficEvent) {
        if !self.is_enabled() {
            return;
        }

        let sink = self.sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(sink) = sink else {
            return;
        };

        if let Err(e) = sink.record(&event.with_timestamp()) {
            error!("Failed to record traffic event: {}", e);
        }
    }
}

impl Default for TrafficLogger {
    fn default() -> Self {
        Self::new_null()
    }
}

impl std::fmt::Debug for TrafficLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficLogger")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl TrafficSink for Collect {
        fn record(&self, event: &TimestampedEvent<'_>) -> Result<(), TelemetryError> {
            self.0.lock().unwrap().push(serde_json::to_string(event)?);
            Ok(())
        }
    }

    fn failure() -> TrafficEvent {
        TrafficEvent::failure("test", "boom")
    }

    #[test]
    fn test_null_logger_discards() {
        let logger = TrafficLogger::new_null();
        assert!(!logger.is_enabled());
        logger.log(failure());
    }

    #[test]
    fn test_enabled_logger_records() {
        let sink = Arc::new(Collect::default());
        let logger = TrafficLogger::new(sink.clone());

        logger.log(failure());

        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"event\":\"failure\""));
        assert!(lines[0].contains("\"message\":\"boom\""));
    }

    #[test]
    fn test_disabled_logger_keeps_sink_silent() {
        let sink = Arc::new(Collect::default());
        let logger = TrafficLogger::new(sink.clone());

        logger.set_enabled(false);
        logger.log(failure());
        assert!(sink.0.lock().unwrap().is_empty());

        logger.set_enabled(true);
        logger.log(failure());
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_set_sink_enables_logging() {
        let logger = TrafficLogger::new_null();
        let sink = Arc::new(Collect::default());

        logger.set_sink(sink.clone());
        assert!(logger.is_enabled());

        logger.log(failure());
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_writer_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.jsonl");

        let logger = TrafficLogger::new(Arc::new(WriterSink::append_to(&path).unwrap()));
        logger.log(failure());
        logger.log(failure());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["event"], "failure");
        }
    }
}
