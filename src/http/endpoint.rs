//! Endpoint invocation: the monitoring wrapper around pipeline and handler.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → OPTIONS? preflight, nothing else runs
//!     → method allowed? else 405 + Allow
//!     → client IP resolved (forwarding headers only from trusted proxies)
//!     → body buffered up to the limit, else 413 (suspicious_request)
//!       or 400 when the stream fails
//!     → Pipeline (rate limit, auth, schema, ...)
//!     → handler, panics caught
//!     → CORS, security, quota and request-id headers
//!     → metrics + completion log
//! ```

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderValue};
use axum::http::{HeaderMap, Method, Request};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http_body_util::LengthLimitError;
use serde_json::json;

use crate::http::error::{ApiError, ErrorCode};
use crate::http::pipeline::{AdmittedRequest, Pipeline, PipelineOutcome, RawRequest};
use crate::http::request::{request_id, X_REQUEST_ID};
use crate::observability::metrics;
use crate::observability::security_log::{SecurityEvent, SecurityEventType, SecurityLogger};
use crate::security::context::{SecurityContext, TrustedProxies};
use crate::security::headers::{
    apply_rate_limit_headers, apply_security_headers, CorsPolicy, X_RATELIMIT_LIMIT,
};

/// Business logic behind the pipeline.
pub trait EndpointHandler: Send + Sync {
    fn call(&self, request: AdmittedRequest) -> BoxFuture<'static, Result<Response, ApiError>>;
}

impl<F, Fut> EndpointHandler for F
where
    F: Fn(AdmittedRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Response, ApiError>> + Send + 'static,
{
    fn call(&self, request: AdmittedRequest) -> BoxFuture<'static, Result<Response, ApiError>> {
        Box::pin(self(request))
    }
}

/// State every endpoint shares.
#[derive(Debug, Clone)]
pub struct GatewayShared {
    pub cors: CorsPolicy,
    pub security_log: SecurityLogger,
    pub max_body_bytes: usize,
    pub trusted_proxies: TrustedProxies,
}

impl GatewayShared {
    /// Headers every response leaves with.
    pub fn finish(&self, response: &mut Response, request_id: &str) {
        let headers = response.headers_mut();
        self.cors.apply(headers);
        apply_security_headers(headers);
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(X_REQUEST_ID, value);
        }
    }
}

pub struct Endpoint {
    name: String,
    path: String,
    methods: Vec<Method>,
    pipeline: Pipeline,
    handler: Arc<dyn EndpointHandler>,
    shared: Arc<GatewayShared>,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        methods: Vec<Method>,
        pipeline: Pipeline,
        handler: Arc<dyn EndpointHandler>,
        shared: Arc<GatewayShared>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            methods,
            pipeline,
            handler,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle one request. Always produces a response.
    pub async fn serve(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let request_id = request_id(request.headers());

        let mut response = self.dispatch(request, &request_id).await;
        self.shared.finish(&mut response, &request_id);

        let status = response.status();
        metrics::record_request(&self.name, method.as_str(), status.as_u16(), start);
        tracing::info!(
            request_id = %request_id,
            endpoint = %self.name,
            method = %method,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn dispatch(&self, request: Request<Body>, request_id: &str) -> Response {
        if *request.method() == Method::OPTIONS {
            // Still tagged with x-request-id by `finish`, like every response
            return self.shared.cors.preflight();
        }
        if !self.methods.contains(request.method()) {
            return self.method_not_allowed();
        }

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_ip = self.shared.trusted_proxies.client_ip(request.headers(), peer);
        let (parts, body) = request.into_parts();

        let body = match self.read_body(&parts.headers, body).await {
            Ok(body) => body,
            Err(BodyError::TooLarge(len)) => {
                let context = SecurityContext::new(&parts.headers, client_ip);
                return self.payload_too_large(&context, request_id, len);
            }
            Err(BodyError::Unreadable(e)) => {
                tracing::warn!(
                    request_id = %request_id,
                    endpoint = %self.name,
                    client = %client_ip,
                    error = %e,
                    "Request body could not be read"
                );
                return ApiError::new(ErrorCode::InvalidBody, "Request body could not be read")
                    .into_response();
            }
        };

        let raw = RawRequest {
            request_id: request_id.to_string(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            client_ip,
        };

        let admitted = match self.pipeline.apply(raw) {
            PipelineOutcome::Admitted(admitted) => admitted,
            PipelineOutcome::Rejected(response) => return response,
        };
        let quota = admitted.rate_limit().copied();
        let context = admitted.context().clone();

        let outcome = AssertUnwindSafe(self.handler.call(admitted))
            .catch_unwind()
            .await;
        let mut response = match outcome {
            Ok(Ok(response)) => {
                if response.status().is_server_error() {
                    self.report_failure(
                        &context,
                        request_id,
                        json!({ "status": response.status().as_u16() }),
                    );
                }
                response
            }
            Ok(Err(err)) => {
                if err.status().is_server_error() {
                    tracing::error!(
                        request_id = %request_id,
                        endpoint = %self.name,
                        error = %err,
                        "Handler failed"
                    );
                    self.report_failure(&context, request_id, json!({ "code": err.code() }));
                }
                err.into_response()
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(
                    request_id = %request_id,
                    endpoint = %self.name,
                    panic = %reason,
                    "Handler panicked"
                );
                self.report_failure(&context, request_id, json!({ "panic": true }));
                ApiError::internal().into_response()
            }
        };

        if let Some(quota) = quota {
            if !response.headers().contains_key(X_RATELIMIT_LIMIT) {
                apply_rate_limit_headers(response.headers_mut(), &quota);
            }
        }
        response
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, BodyError> {
        let limit = self.shared.max_body_bytes;
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit as u64) {
            return Err(BodyError::TooLarge(declared));
        }
        axum::body::to_bytes(body, limit).await.map_err(|e| {
            let source = e.into_inner();
            if source.is::<LengthLimitError>() {
                BodyError::TooLarge(declared)
            } else {
                BodyError::Unreadable(source.to_string())
            }
        })
    }

    fn method_not_allowed(&self) -> Response {
        let allow = self
            .methods
            .iter()
            .chain(std::iter::once(&Method::OPTIONS))
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut err = ApiError::new(ErrorCode::MethodNotAllowed, "Method not allowed");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            err = err.with_header(header::ALLOW, value);
        }
        err.into_response()
    }

    fn payload_too_large(
        &self,
        context: &SecurityContext,
        request_id: &str,
        declared: Option<u64>,
    ) -> Response {
        tracing::warn!(
            request_id = %request_id,
            endpoint = %self.name,
            client = %context.ip_address,
            limit = self.shared.max_body_bytes,
            "Request body over limit"
        );
        self.shared.security_log.log(
            SecurityEvent::new(SecurityEventType::SuspiciousRequest)
                .with_context(context)
                .with_metadata(json!({
                    "reason": "payload_too_large",
                    "endpoint": self.name,
                    "limit": self.shared.max_body_bytes,
                    "content_length": declared,
                })),
        );
        ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!(
                "Request body exceeds the {} byte limit",
                self.shared.max_body_bytes
            ),
        )
        .into_response()
    }

    fn report_failure(&self, context: &SecurityContext, request_id: &str, detail: serde_json::Value) {
        self.shared.security_log.log(
            SecurityEvent::new(SecurityEventType::UnexpectedError)
                .with_context(context)
                .with_metadata(json!({
                    "endpoint": self.name,
                    "request_id": request_id,
                    "detail": detail,
                })),
        );
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

enum BodyError {
    /// Over the limit; carries the declared length, if any.
    TooLarge(Option<u64>),
    Unreadable(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
