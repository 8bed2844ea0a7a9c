//! Middleware composition.
//!
//! # Data Flow
//! ```text
//! RawRequest
//!     → SecurityContext initialized (IP, user agent), once
//!     → step 1 → Continue
//!     → step 2 → Terminal(response)  ── returned as-is, later steps never run
//!     → ...
//!     → AdmittedRequest (context now read-only)
//! ```
//!
//! # Design Decisions
//! - Order is chosen per endpoint; cheap checks usually go first
//! - Nothing done by earlier steps is rolled back on a later rejection, so
//!   each step must be safe to apply partially

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use serde_json::Value;

use crate::security::context::SecurityContext;
use crate::security::rate_limit::RateLimitDecision;

/// What a step decided.
#[derive(Debug)]
pub enum MiddlewareResult {
    Continue,
    Terminal(Response),
}

/// One request-processing step.
pub trait Middleware: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    fn apply(&self, request: &mut GatewayRequest) -> MiddlewareResult;
}

/// A buffered request before the pipeline runs.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Already resolved against the trusted proxy list.
    pub client_ip: String,
}

/// A request as seen by middleware.
#[derive(Debug)]
pub struct GatewayRequest {
    request_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    context: SecurityContext,
    validated: Option<Value>,
    rate_limit: Option<RateLimitDecision>,
}

impl GatewayRequest {
    fn from_raw(raw: RawRequest) -> Self {
        let context = SecurityContext::new(&raw.headers, raw.client_ip);
        Self {
            request_id: raw.request_id,
            method: raw.method,
            uri: raw.uri,
            headers: raw.headers,
            body: raw.body,
            context,
            validated: None,
            rate_limit: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.context
    }

    pub fn set_validated(&mut self, data: Value) {
        self.validated = Some(data);
    }

    /// Keep the decision with the least remaining quota.
    pub fn record_rate_limit(&mut self, decision: RateLimitDecision) {
        self.rate_limit = match self.rate_limit {
            Some(current) if current.remaining <= decision.remaining => Some(current),
            _ => Some(decision),
        };
    }

    pub fn rate_limit(&self) -> Option<&RateLimitDecision> {
        self.rate_limit.as_ref()
    }
}

/// A request that passed every step. Handlers can read the context but not
/// change it.
#[derive(Debug)]
pub struct AdmittedRequest {
    inner: GatewayRequest,
}

impl AdmittedRequest {
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.inner.body
    }

    pub fn context(&self) -> &SecurityContext {
        &self.inner.context
    }

    /// Schema-cleaned input, when the endpoint declares a schema.
    pub fn validated(&self) -> Option<&Value> {
        self.inner.validated.as_ref()
    }

    pub fn rate_limit(&self) -> Option<&RateLimitDecision> {
        self.inner.rate_limit.as_ref()
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Admitted(AdmittedRequest),
    Rejected(Response),
}

impl PipelineOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, PipelineOutcome::Admitted(_))
    }
}

/// An ordered list of middleware steps.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: Arc<dyn Middleware>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Arc<dyn Middleware>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, stopping at the first terminal response.
    pub fn apply(&self, raw: RawRequest) -> PipelineOutcome {
        let mut request = GatewayRequest::from_raw(raw);

        for step in &self.steps {
            match step.apply(&mut request) {
                MiddlewareResult::Continue => {}
                MiddlewareResult::Terminal(response) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        step = step.name(),
                        status = %response.status(),
                        "Pipeline short-circuited"
                    );
                    return PipelineOutcome::Rejected(response);
                }
            }
        }

        PipelineOutcome::Admitted(AdmittedRequest { inner: request })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .finish()
    }
}
