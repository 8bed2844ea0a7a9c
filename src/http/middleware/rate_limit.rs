//! Rate limiting step.

use std::sync::Arc;

use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::pipeline::{GatewayRequest, Middleware, MiddlewareResult};
use crate::observability::metrics;
use crate::observability::security_log::{SecurityEvent, SecurityEventType, SecurityLogger};
use crate::security::context::SecurityContext;
use crate::security::rate_limit::{RateLimitPolicy, RateLimiter};

/// Which identity a policy counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// `ip:<client address>`
    Ip,
    /// `user:<subject>`, or the IP identity when unauthenticated.
    Subject,
}

impl KeySource {
    pub fn identity(&self, ctx: &SecurityContext) -> String {
        match (self, ctx.subject_id.as_deref()) {
            (KeySource::Subject, Some(subject)) => format!("user:{subject}"),
            _ => format!("ip:{}", ctx.ip_address),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub policy: RateLimitPolicy,
    pub key: KeySource,
}

/// Applies one or more policies; all must pass.
pub struct RateLimitStep {
    limiter: Arc<RateLimiter>,
    rules: Vec<RateLimitRule>,
    security_log: SecurityLogger,
}

impl RateLimitStep {
    pub fn new(
        limiter: Arc<RateLimiter>,
        rules: Vec<RateLimitRule>,
        security_log: SecurityLogger,
    ) -> Self {
        Self {
            limiter,
            rules,
            security_log,
        }
    }
}

impl Middleware for RateLimitStep {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn apply(&self, request: &mut GatewayRequest) -> MiddlewareResult {
        let identities: Vec<String> = self
            .rules
            .iter()
            .map(|rule| rule.key.identity(request.context()))
            .collect();
        let checks = self
            .rules
            .iter()
            .zip(identities.iter())
            .map(|(rule, identity)| (&rule.policy, identity.as_str()));

        match self.limiter.check_all(checks) {
            Ok(Some(decision)) => {
                request.record_rate_limit(decision);
                MiddlewareResult::Continue
            }
            Ok(None) => MiddlewareResult::Continue,
            Err(rejection) => {
                let now = self.limiter.clock().now_ms();
                tracing::warn!(
                    request_id = %request.request_id(),
                    client = %rejection.identity,
                    policy = %rejection.key_prefix,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(&rejection.key_prefix);
                self.security_log.log(
                    SecurityEvent::new(SecurityEventType::RateLimitExceeded)
                        .with_context(request.context())
                        .with_metadata(json!({
                            "policy": rejection.key_prefix,
                            "identity": rejection.identity,
                            "limit": rejection.decision.limit,
                            "path": request.uri().path(),
                        })),
                );
                MiddlewareResult::Terminal(
                    ApiError::rate_limited(&rejection.decision, now).into_response(),
                )
            }
        }
    }
}
