//! In-process tests of the configured endpoints through the full router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tower::ServiceExt;

use request_gateway::config::GatewayConfig;
use request_gateway::http::{AdmittedRequest, ApiError};
use request_gateway::observability::{
    SecurityEvent, SecurityEventSink, SecurityEventType, SecurityLogger, SinkError,
};

mod common;
use common::{bearer, body_json, request, Harness};

const CHECKOUT: &str = "/api/create-checkout-session";
const STATUS: &str = "/api/subscription-status";

fn checkout(ip: &str, token: Option<&str>, body: Value) -> Request<Body> {
    request(Method::POST, CHECKOUT, ip, token, Some(body))
}

async fn send(harness: &Harness, request: Request<Body>) -> Response {
    harness.router.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_preflight_short_circuits_everything() {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);

    let response = send(
        &harness,
        request(Method::OPTIONS, CHECKOUT, "10.0.0.1", None, None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().get("x-ratelimit-limit").is_none());
    assert!(response.headers().get("content-type").is_none());
    // Correlation id only; no quota or content headers
    assert!(response.headers().contains_key("x-request-id"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
    assert_eq!(harness.calls(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_token_never_reaches_handler() {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);

    let response = send(
        &harness,
        checkout("10.0.0.1", None, json!({ "priceId": "price_1" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    let body = body_json(response).await;
    assert_eq!(body["code"], "MISSING_AUTH_TOKEN");
    assert!(body["timestamp"].is_string());
    assert_eq!(harness.calls(), 0);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SecurityEventType::AuthFailure);
    assert_eq!(event.ip_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(event.user_agent.as_deref(), Some("integration-test"));
}

#[tokio::test]
async fn test_malformed_token_rejected() {
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);

    let response = send(
        &harness,
        checkout("10.0.0.1", Some("Bearer only.two"), json!({ "priceId": "price_1" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_AUTH_TOKEN");
}

#[tokio::test]
async fn test_admitted_request_carries_subject_and_clean_data() {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);
    let token = bearer("user-1");

    let response = send(
        &harness,
        checkout(
            "10.0.0.1",
            Some(&token),
            json!({ "priceId": "price_123", "quantity": 2, "extra": true }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    // Tightest of api (100) and checkout (10)
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    assert_eq!(
        response.headers()["x-ratelimit-reset"],
        ((common::START_MS + 60_000) / 1000).to_string().as_str()
    );
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["subject"], "user-1");
    assert_eq!(
        body["data"]["validated"],
        json!({ "priceId": "price_123", "quantity": 2 })
    );
    assert_eq!(harness.calls(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_rate_limit_rejection_and_window_reset() {
    let mut config = GatewayConfig::default();
    config.rate_limits.0.get_mut("api").unwrap().max_requests = 2;
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&config, log);
    let token = bearer("user-1");
    let status = || request(Method::GET, STATUS, "10.0.0.1", Some(&token), None);

    for _ in 0..2 {
        assert_eq!(send(&harness, status()).await.status(), StatusCode::OK);
    }

    let response = send(&harness, status()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(response.headers()["retry-after"], "60");
    assert_eq!(
        response.headers()["x-ratelimit-reset"],
        ((common::START_MS + 60_000) / 1000).to_string().as_str()
    );
    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["message"], "Too many requests. Please try again in 60 seconds.");
    assert_eq!(harness.calls(), 2);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SecurityEventType::RateLimitExceeded);
    assert_eq!(event.metadata["policy"], "api");

    // Another client has its own quota
    let other = request(Method::GET, STATUS, "10.0.0.2", Some(&token), None);
    assert_eq!(send(&harness, other).await.status(), StatusCode::OK);

    // A request exactly at the reset boundary opens a new window
    harness.clock.advance(Duration::from_secs(60));
    assert_eq!(send(&harness, status()).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rotating_forwarded_for_shares_the_peer_quota() {
    let mut config = GatewayConfig::default();
    config.rate_limits.0.get_mut("api").unwrap().max_requests = 2;
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&config, log);
    let token = bearer("user-1");

    let mut statuses = Vec::new();
    for i in 0..5 {
        let mut req = request(Method::GET, STATUS, "203.0.113.9", Some(&token), None);
        req.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_str(&format!("198.51.100.{i}")).unwrap(),
        );
        req.headers_mut().insert(
            "x-real-ip",
            HeaderValue::from_str(&format!("192.0.2.{i}")).unwrap(),
        );
        statuses.push(send(&harness, req).await.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429, 429, 429]);
    assert_eq!(harness.calls(), 2);
}

/// Client IP recorded on the auth-failure event for `request`.
async fn recorded_ip(config: &GatewayConfig, request: Request<Body>) -> Option<String> {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(config, log);
    let response = send(&harness, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    events.try_recv().unwrap().ip_address
}

#[tokio::test]
async fn test_client_ip_from_trusted_proxy_only() {
    let mut config = GatewayConfig::default();
    config.security.trusted_proxies = vec!["10.0.0.254".parse().unwrap()];

    let mut via_proxy = checkout("10.0.0.254", None, json!({}));
    via_proxy
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7, 10.0.0.254"));
    via_proxy
        .headers_mut()
        .insert("x-real-ip", HeaderValue::from_static("198.51.100.8"));
    assert_eq!(recorded_ip(&config, via_proxy).await.as_deref(), Some("198.51.100.7"));

    let mut real_ip_only = checkout("10.0.0.254", None, json!({}));
    real_ip_only
        .headers_mut()
        .insert("x-real-ip", HeaderValue::from_static("198.51.100.8"));
    assert_eq!(recorded_ip(&config, real_ip_only).await.as_deref(), Some("198.51.100.8"));

    let bare_proxy = checkout("10.0.0.254", None, json!({}));
    assert_eq!(recorded_ip(&config, bare_proxy).await.as_deref(), Some("10.0.0.254"));

    let mut spoofed = checkout("203.0.113.9", None, json!({}));
    spoofed
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
    assert_eq!(recorded_ip(&config, spoofed).await.as_deref(), Some("203.0.113.9"));

    let no_socket = Request::builder()
        .method(Method::POST)
        .uri(CHECKOUT)
        .header("x-forwarded-for", "198.51.100.7")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(recorded_ip(&config, no_socket).await.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn test_trusted_proxy_clients_counted_separately() {
    let mut config = GatewayConfig::default();
    config.security.trusted_proxies = vec!["10.0.0.254".parse().unwrap()];
    config.rate_limits.0.get_mut("api").unwrap().max_requests = 1;
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&config, log);
    let token = bearer("user-1");
    let behind_proxy = |client: &'static str| {
        let mut req = request(Method::GET, STATUS, "10.0.0.254", Some(&token), None);
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static(client));
        req
    };

    assert_eq!(send(&harness, behind_proxy("198.51.100.1")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&harness, behind_proxy("198.51.100.1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&harness, behind_proxy("198.51.100.2")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_subject_keyed_policy_follows_the_user() {
    let mut config = GatewayConfig::default();
    config.rate_limits.0.get_mut("checkout").unwrap().max_requests = 1;
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&config, log);
    let alice = bearer("alice");
    let bob = bearer("bob");
    let body = || json!({ "priceId": "price_1" });

    let first = send(&harness, checkout("10.0.0.1", Some(&alice), body())).await;
    assert_eq!(first.status(), StatusCode::OK);

    let moved = send(&harness, checkout("10.0.0.9", Some(&alice), body())).await;
    assert_eq!(moved.status(), StatusCode::TOO_MANY_REQUESTS);

    let other_user = send(&harness, checkout("10.0.0.1", Some(&bob), body())).await;
    assert_eq!(other_user.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validation_errors_listed() {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);
    let token = bearer("user-1");

    let response = send(
        &harness,
        checkout(
            "10.0.0.1",
            Some(&token),
            json!({ "priceId": "prod_1", "quantity": 500, "successUrl": "not a url" }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let mut fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    fields.sort();
    fields.dedup();
    assert_eq!(fields, vec!["priceId", "quantity", "successUrl"]);
    assert_eq!(harness.calls(), 0);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SecurityEventType::InvalidInput);
    assert_eq!(event.subject_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn test_wrong_content_type() {
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);

    let request = Request::builder()
        .method(Method::POST)
        .uri(CHECKOUT)
        .header("authorization", bearer("user-1"))
        .header("content-type", "text/plain")
        .body(Body::from("priceId=price_1"))
        .unwrap();
    let response = send(&harness, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_CONTENT_TYPE");
}

#[tokio::test]
async fn test_query_parameters_coerced() {
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);
    let token = bearer("user-1");

    let response = send(
        &harness,
        request(
            Method::GET,
            "/api/subscription-status?includeHistory=true&limit=5",
            "10.0.0.1",
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["data"]["validated"],
        json!({ "includeHistory": true, "limit": 5 })
    );

    let response = send(
        &harness,
        request(
            Method::GET,
            "/api/subscription-status?limit=500",
            "10.0.0.1",
            Some(&token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

struct FailingSink;

impl SecurityEventSink for FailingSink {
    fn write(&self, _event: &SecurityEvent) -> Result<(), SinkError> {
        Err(SinkError::Rejected("event store offline".into()))
    }
}

#[tokio::test]
async fn test_failing_event_sink_does_not_change_response() {
    let (failing_log, _worker) = SecurityLogger::spawn(Arc::new(FailingSink), 4);
    let failing = Harness::new(&GatewayConfig::default(), failing_log);
    let (healthy_log, _events) = SecurityLogger::channel(64);
    let healthy = Harness::new(&GatewayConfig::default(), healthy_log);

    for _ in 0..3 {
        let a = send(&failing, checkout("10.0.0.1", None, json!({}))).await;
        let b = send(&healthy, checkout("10.0.0.1", None, json!({}))).await;
        assert_eq!(a.status(), b.status());
        assert_eq!(body_json(a).await["code"], body_json(b).await["code"]);
    }
}

async fn exploding(_request: AdmittedRequest) -> Result<Response, ApiError> {
    panic!("connection string postgres://admin:hunter2@db leaked");
}

#[tokio::test]
async fn test_handler_panic_is_generic_500() {
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::with_handler(&GatewayConfig::default(), log, exploding);
    let token = bearer("user-1");

    let response = send(
        &harness,
        checkout("10.0.0.1", Some(&token), json!({ "priceId": "price_1" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body = body_json(response).await;
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert!(!body.to_string().contains("hunter2"));

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SecurityEventType::UnexpectedError);
}

#[tokio::test]
async fn test_routing_edges() {
    let (log, _events) = SecurityLogger::channel(64);
    let harness = Harness::new(&GatewayConfig::default(), log);

    let response = send(&harness, request(Method::GET, "/nope", "10.0.0.1", None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = send(&harness, request(Method::GET, CHECKOUT, "10.0.0.1", None, None)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "POST, OPTIONS");

    let response = send(&harness, request(Method::GET, "/health", "10.0.0.1", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = GatewayConfig::default();
    config.security.max_body_bytes = 64;
    let (log, mut events) = SecurityLogger::channel(64);
    let harness = Harness::new(&config, log);
    let token = bearer("user-1");

    let response = send(
        &harness,
        checkout(
            "10.0.0.1",
            Some(&token),
            json!({ "priceId": "price_1", "successUrl": format!("https://x.example/{}", "a".repeat(200)) }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(harness.calls(), 0);
    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, SecurityEventType::SuspiciousRequest);
}
