//! Bearer authentication step.

use axum::response::IntoResponse;
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::pipeline::{GatewayRequest, Middleware, MiddlewareResult};
use crate::observability::metrics;
use crate::observability::security_log::{SecurityEvent, SecurityEventType, SecurityLogger};
use crate::security::auth::authenticate;

/// Requires a structurally valid bearer token and records its subject.
pub struct AuthStep {
    security_log: SecurityLogger,
}

impl AuthStep {
    pub fn new(security_log: SecurityLogger) -> Self {
        Self { security_log }
    }
}

impl Middleware for AuthStep {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn apply(&self, request: &mut GatewayRequest) -> MiddlewareResult {
        match authenticate(request.headers()) {
            Ok(subject) => {
                tracing::debug!(
                    request_id = %request.request_id(),
                    subject_id = %subject.subject_id,
                    "Request authenticated"
                );
                request.context_mut().attach_subject(subject);
                MiddlewareResult::Continue
            }
            Err(err) => {
                let code = err.code();
                tracing::warn!(
                    request_id = %request.request_id(),
                    client = %request.context().ip_address,
                    code = %code,
                    "Authentication failed"
                );
                metrics::record_auth_failure(code);
                self.security_log.log(
                    SecurityEvent::new(SecurityEventType::AuthFailure)
                        .with_context(request.context())
                        .with_metadata(json!({
                            "code": code,
                            "path": request.uri().path(),
                            "method": request.method().as_str(),
                        })),
                );
                MiddlewareResult::Terminal(ApiError::from(err).into_response())
            }
        }
    }
}
