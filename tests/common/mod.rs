//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request};
use axum::response::Response;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use request_gateway::config::env::{IDENTITY_KEY, IDENTITY_URL, UPSTREAM_URL};
use request_gateway::config::{GatewayConfig, PlatformEnv};
use request_gateway::http::response::success;
use request_gateway::http::{
    build_endpoints, build_router, AdmittedRequest, ApiError, EndpointHandler, GatewayShared,
};
use request_gateway::observability::SecurityLogger;
use request_gateway::security::{
    CorsPolicy, InMemoryCounterStore, ManualClock, RateLimiter, TrustedProxies,
};

pub const START_MS: u64 = 1_700_000_000_000;

pub fn platform_env(upstream: &str) -> PlatformEnv {
    PlatformEnv::from_lookup(&[], |name| match name {
        UPSTREAM_URL => Some(upstream.to_string()),
        IDENTITY_URL => Some("https://id.example".to_string()),
        IDENTITY_KEY => Some("service-key".to_string()),
        _ => None,
    })
    .unwrap()
}

/// A structurally valid bearer token for `sub`.
pub fn bearer(sub: &str) -> String {
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "session_id": "sess-1" }).to_string());
    format!("Bearer eyJhbGciOiJIUzI1NiJ9.{payload}.c2lnbmF0dXJl")
}

pub fn limiter(clock: &Arc<ManualClock>) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        clock.clone(),
    ))
}

/// Router over the configured endpoints with an in-process handler that
/// counts calls and echoes what the pipeline admitted.
pub struct Harness {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(config: &GatewayConfig, security_log: SecurityLogger) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        Self::with_handler(config, security_log, move |request: AdmittedRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<Response, ApiError>(success(json!({
                    "subject": request.context().subject_id,
                    "validated": request.validated(),
                })))
            }
        })
        .with_calls(calls)
    }

    pub fn with_handler<H>(config: &GatewayConfig, security_log: SecurityLogger, handler: H) -> Self
    where
        H: EndpointHandler + 'static,
    {
        let clock = Arc::new(ManualClock::new(START_MS));
        let shared = Arc::new(GatewayShared {
            cors: CorsPolicy::from_config(&config.cors).unwrap(),
            security_log,
            max_body_bytes: config.security.max_body_bytes,
            trusted_proxies: TrustedProxies::new(config.security.trusted_proxies.iter().copied()),
        });
        let handler: Arc<dyn EndpointHandler> = Arc::new(handler);
        let endpoints =
            build_endpoints(config, &limiter(&clock), &shared, |_| handler.clone()).unwrap();
        Self {
            router: build_router(endpoints, shared),
            clock,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_calls(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A request arriving on a socket from `peer`.
pub fn request(
    method: Method,
    uri: &str,
    peer: &str,
    token: Option<&str>,
    json_body: Option<Value>,
) -> Request<Body> {
    let peer = SocketAddr::new(peer.parse().unwrap(), 40_000);
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(peer))
        .header("user-agent", "integration-test");
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    match json_body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// What the mock upstream saw.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Start a mock upstream on an ephemeral port that records every request
/// and answers with a fixed JSON body.
pub async fn start_mock_upstream() -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let app = Router::new().fallback(move |request: Request<Body>| {
        let tx = tx.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
            let _ = tx.send(Seen {
                method: parts.method,
                path: parts.uri.path().to_string(),
                query: parts.uri.query().map(str::to_string),
                headers: parts.headers,
                body,
            });
            Json(json!({ "success": true, "data": { "url": "https://pay.example/session" } }))
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, rx)
}
