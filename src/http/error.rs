//! Client-facing error codes and the error envelope response.

use std::fmt;

use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http::response::{iso_timestamp, ErrorEnvelope};
use crate::security::auth::AuthError;
use crate::security::headers::{apply_rate_limit_headers, apply_security_headers};
use crate::security::rate_limit::RateLimitDecision;
use crate::validation::FieldError;

/// Stable, machine-readable error codes for client-side branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingAuthToken,
    InvalidAuthToken,
    InvalidTokenPayload,
    TokenDecodeError,
    RateLimitExceeded,
    InvalidContentType,
    InvalidJson,
    ValidationError,
    InvalidBody,
    PayloadTooLarge,
    MethodNotAllowed,
    NotFound,
    UpstreamUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingAuthToken => "MISSING_AUTH_TOKEN",
            ErrorCode::InvalidAuthToken => "INVALID_AUTH_TOKEN",
            ErrorCode::InvalidTokenPayload => "INVALID_TOKEN_PAYLOAD",
            ErrorCode::TokenDecodeError => "TOKEN_DECODE_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidContentType => "INVALID_CONTENT_TYPE",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidBody => "INVALID_BODY",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingAuthToken
            | ErrorCode::InvalidAuthToken
            | ErrorCode::InvalidTokenPayload
            | ErrorCode::TokenDecodeError => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InvalidContentType
            | ErrorCode::InvalidJson
            | ErrorCode::ValidationError
            | ErrorCode::InvalidBody => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal error response: status, code, human message, optional details.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    details: Option<Value>,
    headers: HeaderMap,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
            details: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Generic 500. Whatever went wrong stays in the logs.
    pub fn internal() -> Self {
        Self::new(
            ErrorCode::InternalError,
            "An unexpected error occurred. Please try again later.",
        )
    }

    /// 429 with retry hint and quota headers.
    pub fn rate_limited(decision: &RateLimitDecision, now_ms: u64) -> Self {
        let retry_after = decision.retry_after_secs(now_ms);
        let mut err = Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Too many requests. Please try again in {retry_after} seconds."),
        )
        .with_details(json!({ "retryAfter": retry_after }))
        .with_header(RETRY_AFTER, HeaderValue::from(retry_after));
        apply_rate_limit_headers(&mut err.headers, decision);
        err
    }

    /// 400 listing every failing field.
    pub fn validation(errors: &[FieldError]) -> Self {
        Self::new(ErrorCode::ValidationError, "Request validation failed")
            .with_details(json!(errors))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.message.clone(),
            code: self.code,
            details: self.details.clone(),
            timestamp: iso_timestamp(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = self.envelope();
        let mut response = (self.status, Json(envelope)).into_response();
        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        apply_security_headers(headers);
        response
    }
}
