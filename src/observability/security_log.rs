//! Security event logging.
//!
//! # Data Flow
//! ```text
//! middleware / endpoint
//!     → SecurityLogger::log (try_send, never blocks)
//!     → bounded mpsc queue
//!     → background worker
//!     → SecurityEventSink (tracing, JSON lines, ...)
//! ```
//!
//! # Design Decisions
//! - The request path never awaits the sink
//! - A full queue drops the event and counts the drop
//! - Sink errors and sink panics are reported on the error channel
//!   (`tracing::error!`) and swallowed

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::http::response::iso_timestamp;
use crate::observability::metrics;
use crate::security::context::SecurityContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AuthFailure,
    RateLimitExceeded,
    InvalidInput,
    SuspiciousRequest,
    UnexpectedError,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::AuthFailure => "auth_failure",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::InvalidInput => "invalid_input",
            SecurityEventType::SuspiciousRequest => "suspicious_request",
            SecurityEventType::UnexpectedError => "unexpected_error",
        }
    }
}

/// An append-only record of something security-relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub metadata: Value,
    pub timestamp: String,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            subject_id: None,
            ip_address: None,
            user_agent: None,
            metadata: Value::Object(Default::default()),
            timestamp: iso_timestamp(),
        }
    }

    /// Copy subject, IP and user agent from a request context.
    pub fn with_context(mut self, ctx: &SecurityContext) -> Self {
        self.subject_id = ctx.subject_id.clone();
        self.ip_address = Some(ctx.ip_address.clone());
        self.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("security log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("security event could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("security log writer lock poisoned")]
    Poisoned,
    #[error("security event rejected: {0}")]
    Rejected(String),
}

/// Destination for security events.
pub trait SecurityEventSink: Send + Sync {
    fn write(&self, event: &SecurityEvent) -> Result<(), SinkError>;
}

/// Emits events as structured logs under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecurityEventSink for TracingSink {
    fn write(&self, event: &SecurityEvent) -> Result<(), SinkError> {
        tracing::warn!(
            target: "security",
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            subject_id = event.subject_id.as_deref().unwrap_or("-"),
            ip_address = event.ip_address.as_deref().unwrap_or("-"),
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            metadata = %event.metadata,
            "Security event"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl SecurityEventSink for JsonLinesSink {
    fn write(&self, event: &SecurityEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().map_err(|_| SinkError::Poisoned)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Handle for fire-and-forget event logging. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SecurityLogger {
    tx: mpsc::Sender<SecurityEvent>,
    dropped: Arc<AtomicU64>,
}

impl SecurityLogger {
    /// Start a worker draining into `sink`. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn SecurityEventSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (logger, rx) = Self::channel(capacity);
        let worker = tokio::spawn(drain(rx, sink));
        (logger, worker)
    }

    /// A logger whose events are handed to the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queue an event. Never blocks and never fails the caller.
    pub fn log(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_security_event_dropped();
                tracing::warn!(
                    event_type = event.event_type.as_str(),
                    "Security log queue full, event dropped"
                );
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_type = event.event_type.as_str(),
                    "Security log worker is gone, event dropped"
                );
            }
        }
    }

    /// Events discarded because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn drain(mut rx: mpsc::Receiver<SecurityEvent>, sink: Arc<dyn SecurityEventSink>) {
    while let Some(event) = rx.recv().await {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sink.write(&event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    event_type = event.event_type.as_str(),
                    "Failed to record security event"
                );
            }
            Err(_) => {
                tracing::error!(
                    event_type = event.event_type.as_str(),
                    "Security event sink panicked"
                );
            }
        }
    }
    tracing::debug!("Security log worker stopped");
}
