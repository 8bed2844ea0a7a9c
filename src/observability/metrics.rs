//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by endpoint, method, status
//! - `gateway_request_duration_seconds` (histogram): latency by endpoint
//! - `gateway_rate_limited_total` (counter): rejections by policy prefix
//! - `gateway_auth_failures_total` (counter): auth rejections by code
//! - `gateway_validation_failures_total` (counter): 400s by endpoint
//! - `gateway_security_events_dropped_total` (counter): queue overflow
//! - `gateway_counter_store_records` (gauge): live rate-limit records
//!
//! # Design Decisions
//! - Calls are no-ops until a recorder is installed, so tests need no setup
//! - Prometheus exposition runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::error::ErrorCode;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(endpoint: &str, method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(policy: &str) {
    counter!("gateway_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_auth_failure(code: ErrorCode) {
    counter!("gateway_auth_failures_total", "code" => code.as_str()).increment(1);
}

pub fn record_validation_failure(endpoint: &str) {
    counter!("gateway_validation_failures_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

pub fn record_security_event_dropped() {
    counter!("gateway_security_events_dropped_total").increment(1);
}

pub fn record_counter_store_size(records: usize) {
    gauge!("gateway_counter_store_records").set(records as f64);
}
