//! Startup errors.

use axum::http::header::InvalidHeaderValue;
use thiserror::Error;

use crate::config::ConfigError;
use crate::observability::SinkError;
use crate::security::PolicyError;

/// Anything that stops the gateway from starting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rate limit policy '{name}' is invalid: {source}")]
    Policy {
        name: String,
        #[source]
        source: PolicyError,
    },

    #[error("unknown rate limit policy '{0}'")]
    UnknownPolicy(String),

    #[error("invalid method '{0}'")]
    Method(String),

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("security log sink: {0}")]
    Sink(#[from] SinkError),

    #[error("tracing init failed: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics init failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("invalid address '{0}'")]
    Address(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
