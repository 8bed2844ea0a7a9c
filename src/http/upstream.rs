//! Forwarding admitted requests to the upstream service.
//!
//! # Responsibilities
//! - Rebuild the URI from the upstream base, the endpoint's upstream path and
//!   the original query
//! - Pass the caller's token on so the upstream can do its own privileged
//!   verification, plus the gateway's view of the caller
//! - Strip hop-by-hop headers from the upstream response

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::config::PlatformEnv;
use crate::http::endpoint::EndpointHandler;
use crate::http::error::{ApiError, ErrorCode};
use crate::http::pipeline::AdmittedRequest;
use crate::http::request::X_REQUEST_ID;

pub const X_GATEWAY_SUBJECT: HeaderName = HeaderName::from_static("x-gateway-subject");
pub const X_GATEWAY_SESSION: HeaderName = HeaderName::from_static("x-gateway-session");
pub const X_IDENTITY_PLATFORM_URL: HeaderName = HeaderName::from_static("x-identity-platform-url");
pub const X_IDENTITY_PLATFORM_KEY: HeaderName = HeaderName::from_static("x-identity-platform-key");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Request headers copied verbatim from the caller.
const PASSTHROUGH: [HeaderName; 4] = [
    header::AUTHORIZATION,
    header::CONTENT_TYPE,
    header::USER_AGENT,
    header::ACCEPT,
];

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared HTTP client and platform settings.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    base_url: Url,
    identity_url: HeaderValue,
    identity_key: HeaderValue,
}

impl Upstream {
    pub fn new(env: &PlatformEnv) -> Result<Self, header::InvalidHeaderValue> {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let mut identity_key = HeaderValue::from_str(&env.identity_key)?;
        identity_key.set_sensitive(true);
        Ok(Self {
            client,
            base_url: env.upstream_url.clone(),
            identity_url: HeaderValue::from_str(env.identity_url.as_str())?,
            identity_key,
        })
    }

    /// A handler forwarding to `upstream_path`.
    pub fn handler(&self, upstream_path: impl Into<String>) -> UpstreamHandler {
        UpstreamHandler {
            upstream: Arc::new(self.clone()),
            upstream_path: upstream_path.into(),
        }
    }

    fn target(&self, upstream_path: &str, query: Option<&str>) -> Result<Uri, ApiError> {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            upstream_path.trim_start_matches('/')
        );
        url.set_path(&path);
        url.set_query(query);
        url.as_str().parse::<Uri>().map_err(|e| {
            tracing::error!(error = %e, url = %url, "Upstream URI rejected");
            ApiError::internal()
        })
    }

    fn outbound_headers(&self, request: &AdmittedRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in PASSTHROUGH {
            if let Some(value) = request.headers().get(&name) {
                headers.insert(name, value.clone());
            }
        }

        let ctx = request.context();
        let forwarded = [
            (HeaderName::from_static(X_REQUEST_ID), Some(request.request_id())),
            (X_FORWARDED_FOR, Some(ctx.ip_address.as_str())),
            (X_GATEWAY_SUBJECT, ctx.subject_id.as_deref()),
            (X_GATEWAY_SESSION, ctx.session_id.as_deref()),
        ];
        for (name, value) in forwarded {
            if let Some(Ok(value)) = value.map(HeaderValue::from_str) {
                headers.insert(name, value);
            }
        }

        headers.insert(X_IDENTITY_PLATFORM_URL, self.identity_url.clone());
        headers.insert(X_IDENTITY_PLATFORM_KEY, self.identity_key.clone());
        headers
    }

    async fn forward(
        &self,
        upstream_path: &str,
        request: AdmittedRequest,
    ) -> Result<Response, ApiError> {
        let uri = self.target(upstream_path, request.uri().query())?;
        let mut builder = Request::builder().method(request.method().clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.outbound_headers(&request);
        }
        let outbound = builder
            .body(Body::from(request.body().clone()))
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build upstream request");
                ApiError::internal()
            })?;

        let response = self.client.request(outbound).await.map_err(|e| {
            tracing::error!(
                request_id = %request.request_id(),
                upstream = %self.base_url,
                error = %e,
                "Upstream error"
            );
            ApiError::new(
                ErrorCode::UpstreamUnavailable,
                "The upstream service is unavailable. Please try again later.",
            )
        })?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Forwards one endpoint's admitted requests.
#[derive(Debug, Clone)]
pub struct UpstreamHandler {
    upstream: Arc<Upstream>,
    upstream_path: String,
}

impl EndpointHandler for UpstreamHandler {
    fn call(&self, request: AdmittedRequest) -> BoxFuture<'static, Result<Response, ApiError>> {
        let upstream = self.upstream.clone();
        let path = self.upstream_path.clone();
        Box::pin(async move { upstream.forward(&path, request).await })
    }
}
