//! Traffic logging for kproxy.
//!
//! Every request, response and tunnel the proxy handles can be recorded as a
//! structured JSON event. Recording goes through a [`TrafficLogger`] that is
//! handed to the proxy server at construction; the default logger discards
//! everything, so library users and tests pay nothing unless they opt in.
//!
//! # Architecture
//!
//! - **Traffic logging** (this module): one JSON event per proxied exchange,
//!   delivered to a pluggable [`TrafficSink`]
//! - **Diagnostics** (`tracing`): internal debug output, configured by the
//!   binary's subscriber
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"request","context":"http","method":"GET","host":"example.com",...}
//! ```

mod error;
mod events;
mod sink;

pub use error::TelemetryError;
pub use events::{TimestampedEvent, TrafficEvent};
pub use sink::{TracingSink, TrafficLogger, TrafficSink, WriterSink, TRAFFIC_TARGET};
