//! Success and error envelopes.
//!
//! ```text
//! success: {"success": true, "data": ..., "message"?: "...", "timestamp": "..."}
//! error:   {"error": "...", "message": "...", "code": "...", "details"?: ..., "timestamp": "..."}
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::http::error::ErrorCode;
use crate::security::headers::apply_security_headers;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: String,
}

/// UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn iso_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_default()
}

pub fn success<T: Serialize>(data: T) -> Response {
    success_with(StatusCode::OK, data, None)
}

pub fn success_with<T: Serialize>(status: StatusCode, data: T, message: Option<String>) -> Response {
    let envelope = SuccessEnvelope {
        success: true,
        data,
        message,
        timestamp: iso_timestamp(),
    };
    let mut response = (status, Json(envelope)).into_response();
    apply_security_headers(response.headers_mut());
    response
}
