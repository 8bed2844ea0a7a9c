//! Schema validation step.

use axum::response::IntoResponse;
use serde_json::json;

use crate::http::error::{ApiError, ErrorCode};
use crate::http::pipeline::{GatewayRequest, Middleware, MiddlewareResult};
use crate::observability::metrics;
use crate::observability::security_log::{SecurityEvent, SecurityEventType, SecurityLogger};
use crate::validation::{validate_request, SchemaName};

/// Validates input against a fixed schema and attaches the cleaned data.
pub struct SchemaStep {
    endpoint: String,
    schema: SchemaName,
    security_log: SecurityLogger,
}

impl SchemaStep {
    pub fn new(endpoint: impl Into<String>, schema: SchemaName, security_log: SecurityLogger) -> Self {
        Self {
            endpoint: endpoint.into(),
            schema,
            security_log,
        }
    }
}

impl Middleware for SchemaStep {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn apply(&self, request: &mut GatewayRequest) -> MiddlewareResult {
        let outcome = validate_request(
            self.schema,
            request.method(),
            request.uri(),
            request.headers(),
            request.body(),
        );
        match outcome {
            Ok(data) => {
                request.set_validated(data);
                MiddlewareResult::Continue
            }
            Err(err) => {
                tracing::info!(
                    request_id = %request.request_id(),
                    endpoint = %self.endpoint,
                    schema = self.schema.as_str(),
                    code = %err.code(),
                    "Request failed validation"
                );
                metrics::record_validation_failure(&self.endpoint);
                if err.code() == ErrorCode::ValidationError {
                    self.security_log.log(
                        SecurityEvent::new(SecurityEventType::InvalidInput)
                            .with_context(request.context())
                            .with_metadata(json!({
                                "endpoint": self.endpoint,
                                "schema": self.schema.as_str(),
                                "errors": err.details(),
                            })),
                    );
                }
                MiddlewareResult::Terminal(err.into_response())
            }
        }
    }
}
