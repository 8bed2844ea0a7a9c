//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → security_log.rs (security events, off the request path)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log lines of a request
//! - Observability failures never fail a request

pub mod logging;
pub mod metrics;
pub mod security_log;

pub use security_log::{
    JsonLinesSink, SecurityEvent, SecurityEventSink, SecurityEventType, SecurityLogger,
    SinkError, TracingSink,
};
