//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build one pipeline per configured endpoint
//! - Create the Axum router (endpoints, `/health`, 404 fallback)
//! - Wire up tower layers (request ID, tracing)
//! - Bind server to listener with graceful shutdown

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::{EndpointConfig, GatewayConfig, PlatformEnv, StepConfig};
use crate::error::GatewayError;
use crate::http::endpoint::{Endpoint, EndpointHandler, GatewayShared};
use crate::http::error::{ApiError, ErrorCode};
use crate::http::middleware::{AuthStep, RateLimitRule, RateLimitStep, SchemaStep};
use crate::http::pipeline::Pipeline;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::success;
use crate::http::upstream::Upstream;
use crate::observability::security_log::{
    JsonLinesSink, SecurityEventSink, SecurityLogger, TracingSink,
};
use crate::security::clock::SystemClock;
use crate::security::context::TrustedProxies;
use crate::security::headers::CorsPolicy;
use crate::security::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::security::store::InMemoryCounterStore;

/// How long shutdown waits for queued security events to be written.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    security_log: SecurityLogger,
    log_worker: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Create the server with an in-memory counter store, the system clock,
    /// and the configured security event sink. Must run inside a Tokio runtime.
    pub fn new(config: &GatewayConfig, env: &PlatformEnv) -> Result<Self, GatewayError> {
        let sink: Arc<dyn SecurityEventSink> = match &config.security_log.path {
            Some(path) => Arc::new(JsonLinesSink::open(Path::new(path))?),
            None => Arc::new(TracingSink),
        };
        let (security_log, worker) = SecurityLogger::spawn(sink, config.security_log.queue_capacity);
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::new()), Arc::new(SystemClock))
            .with_sweep_threshold(config.counter_store.sweep_threshold)
            .with_sweep_interval(config.counter_store.sweep_interval);

        let mut server = Self::with_parts(config, env, Arc::new(limiter), security_log)?;
        server.log_worker = Some(worker);
        Ok(server)
    }

    /// Create the server around an existing limiter and security logger.
    pub fn with_parts(
        config: &GatewayConfig,
        env: &PlatformEnv,
        limiter: Arc<RateLimiter>,
        security_log: SecurityLogger,
    ) -> Result<Self, GatewayError> {
        let shared = Arc::new(GatewayShared {
            cors: CorsPolicy::from_config(&config.cors)?,
            security_log: security_log.clone(),
            max_body_bytes: config.security.max_body_bytes,
            trusted_proxies: TrustedProxies::new(config.security.trusted_proxies.iter().copied()),
        });
        let upstream = Upstream::new(env)?;
        let endpoints = build_endpoints(config, &limiter, &shared, |endpoint| {
            let handler: Arc<dyn EndpointHandler> =
                Arc::new(upstream.handler(endpoint.upstream_path()));
            handler
        })?;

        Ok(Self {
            router: build_router(endpoints, shared),
            security_log,
            log_worker: None,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then flush the security log.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let Self {
            router,
            security_log,
            log_worker,
        } = self;

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        // The worker exits once every logger handle is gone
        drop(security_log);
        if let Some(worker) = log_worker {
            if tokio::time::timeout(LOG_DRAIN_TIMEOUT, worker).await.is_err() {
                tracing::warn!("Security log did not drain before shutdown");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Assemble each configured endpoint's pipeline. `handler_for` supplies the
/// business logic behind it.
pub fn build_endpoints<F>(
    config: &GatewayConfig,
    limiter: &Arc<RateLimiter>,
    shared: &Arc<GatewayShared>,
    handler_for: F,
) -> Result<Vec<Endpoint>, GatewayError>
where
    F: Fn(&EndpointConfig) -> Arc<dyn EndpointHandler>,
{
    let mut policies = BTreeMap::new();
    for (name, policy) in config.rate_limits.iter() {
        let prefix = policy.prefix(name).to_string();
        let built = RateLimitPolicy::new(policy.window(), policy.max_requests, prefix)
            .map_err(|source| GatewayError::Policy {
                name: name.clone(),
                source,
            })?;
        policies.insert(name.as_str(), built);
    }

    let mut endpoints = Vec::new();
    for endpoint in config.endpoints.iter() {
        let methods = endpoint
            .methods
            .iter()
            .map(|m| {
                m.to_ascii_uppercase()
                    .parse::<Method>()
                    .map_err(|_| GatewayError::Method(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipeline = Pipeline::new();
        for step in &endpoint.steps {
            match step {
                StepConfig::RateLimit { policies: rules } => {
                    let rules = rules
                        .iter()
                        .map(|rule| {
                            policies
                                .get(rule.policy.as_str())
                                .map(|policy| RateLimitRule {
                                    policy: policy.clone(),
                                    key: rule.key,
                                })
                                .ok_or_else(|| GatewayError::UnknownPolicy(rule.policy.clone()))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    pipeline.push(Arc::new(RateLimitStep::new(
                        limiter.clone(),
                        rules,
                        shared.security_log.clone(),
                    )));
                }
                StepConfig::Auth => {
                    pipeline.push(Arc::new(AuthStep::new(shared.security_log.clone())));
                }
            }
        }
        if let Some(schema) = endpoint.schema {
            pipeline.push(Arc::new(SchemaStep::new(
                endpoint.name.clone(),
                schema,
                shared.security_log.clone(),
            )));
        }

        tracing::debug!(
            endpoint = %endpoint.name,
            path = %endpoint.path,
            steps = ?pipeline.step_names(),
            "Endpoint configured"
        );
        endpoints.push(Endpoint::new(
            endpoint.name.clone(),
            endpoint.path.clone(),
            methods,
            pipeline,
            handler_for(endpoint),
            shared.clone(),
        ));
    }
    Ok(endpoints)
}

/// Build the Axum router with all middleware layers.
pub fn build_router(endpoints: Vec<Endpoint>, shared: Arc<GatewayShared>) -> Router {
    let health_shared = shared.clone();
    let mut router = Router::new().route(
        "/health",
        any(move |request: Request<Body>| {
            let shared = health_shared.clone();
            async move { health(&shared, request) }
        }),
    );

    for endpoint in endpoints {
        let path = endpoint.path().to_string();
        let endpoint = Arc::new(endpoint);
        router = router.route(
            &path,
            any(move |request: Request<Body>| {
                let endpoint = endpoint.clone();
                async move { endpoint.serve(request).await }
            }),
        );
    }

    router
        .fallback(move |request: Request<Body>| {
            let shared = shared.clone();
            async move { not_found(&shared, request) }
        })
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(set_request_id_layer())
}

fn health(shared: &GatewayShared, request: Request<Body>) -> Response {
    let method = request.method();
    let mut response = if *method == Method::OPTIONS {
        shared.cors.preflight()
    } else if *method == Method::GET || *method == Method::HEAD {
        success(json!({ "status": "ok" }))
    } else {
        ApiError::new(ErrorCode::MethodNotAllowed, "Method not allowed")
            .with_header(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"))
            .into_response()
    };
    shared.finish(&mut response, &request_id(request.headers()));
    response
}

fn not_found(shared: &GatewayShared, request: Request<Body>) -> Response {
    tracing::debug!(path = %request.uri().path(), "No endpoint matched");
    let mut response = ApiError::new(
        ErrorCode::NotFound,
        format!("No endpoint at {}", request.uri().path()),
    )
    .into_response();
    shared.finish(&mut response, &request_id(request.headers()));
    response
}
