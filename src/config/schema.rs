//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::middleware::KeySource;
use crate::validation::SchemaName;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// CORS headers sent on every response.
    pub cors: CorsConfig,

    /// Request size limits and trusted proxies.
    pub security: SecurityConfig,

    /// In-memory counter store settings.
    pub counter_store: CounterStoreConfig,

    /// Named rate limit policies, referenced by endpoint steps.
    pub rate_limits: RateLimitsConfig,

    /// Security event queue and sink.
    pub security_log: SecurityLogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Startup environment contract.
    pub environment: EnvironmentConfig,

    /// Gateway endpoints, each with its own middleware chain.
    pub endpoints: EndpointsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origin: String,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: "*".to_string(),
            allowed_headers: ["authorization", "x-client-info", "apikey", "content-type"]
                .map(String::from)
                .to_vec(),
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`. Requests from
    /// anyone else are keyed by their socket address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024, // 1 MiB
            trusted_proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CounterStoreConfig {
    /// Sweep expired records once the store holds more than this many.
    pub sweep_threshold: usize,

    /// Checks between store size measurements.
    pub sweep_interval: u64,
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        Self {
            sweep_threshold: crate::security::rate_limit::DEFAULT_SWEEP_THRESHOLD,
            sweep_interval: crate::security::rate_limit::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A named fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per window.
    pub max_requests: u32,

    /// Counter key prefix. Defaults to the policy name.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl PolicyConfig {
    /// The prefix counters are stored under.
    pub fn prefix<'a>(&'a self, name: &'a str) -> &'a str {
        self.key_prefix.as_deref().unwrap_or(name)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Policies by name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RateLimitsConfig(pub BTreeMap<String, PolicyConfig>);

impl RateLimitsConfig {
    pub fn get(&self, name: &str) -> Option<&PolicyConfig> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PolicyConfig)> {
        self.0.iter()
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        let policy = |window_ms, max_requests| PolicyConfig {
            window_ms,
            max_requests,
            key_prefix: None,
        };
        Self(BTreeMap::from([
            ("api".to_string(), policy(60_000, 100)),
            ("checkout".to_string(), policy(60_000, 10)),
        ]))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityLogConfig {
    /// Events queued for the background writer before new ones are dropped.
    pub queue_capacity: usize,

    /// Append events as JSON lines to this file. Without it events go to the
    /// `security` log target.
    pub path: Option<String>,
}

impl Default for SecurityLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Variables that must be present at startup, beyond the built-in ones.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub required: Vec<String>,
}

/// One policy applied by a rate limit step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRuleConfig {
    /// Name of an entry in `rate_limits`.
    pub policy: String,

    #[serde(default = "default_key_source")]
    pub key: KeySource,
}

fn default_key_source() -> KeySource {
    KeySource::Ip
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    RateLimit { policies: Vec<RateLimitRuleConfig> },
    Auth,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Identifier for logs and metrics.
    pub name: String,

    /// Route path, e.g. `/api/create-checkout-session`.
    pub path: String,

    /// Accepted methods. `OPTIONS` is always answered as a preflight.
    pub methods: Vec<String>,

    /// Middleware applied in order.
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Schema validated after every step has passed.
    #[serde(default)]
    pub schema: Option<SchemaName>,

    /// Path appended to the upstream base URL. Defaults to `/<name>`.
    #[serde(default)]
    pub upstream_path: Option<String>,
}

impl EndpointConfig {
    pub fn upstream_path(&self) -> String {
        self.upstream_path
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EndpointsConfig(pub Vec<EndpointConfig>);

impl EndpointsConfig {
    pub fn iter(&self) -> std::slice::Iter<'_, EndpointConfig> {
        self.0.iter()
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        let ip_rule = |policy: &str| RateLimitRuleConfig {
            policy: policy.to_string(),
            key: KeySource::Ip,
        };
        let subject_rule = |policy: &str| RateLimitRuleConfig {
            policy: policy.to_string(),
            key: KeySource::Subject,
        };

        Self(vec![
            EndpointConfig {
                name: "create-checkout-session".to_string(),
                path: "/api/create-checkout-session".to_string(),
                methods: vec!["POST".to_string()],
                steps: vec![
                    StepConfig::RateLimit {
                        policies: vec![ip_rule("api")],
                    },
                    StepConfig::Auth,
                    StepConfig::RateLimit {
                        policies: vec![subject_rule("checkout")],
                    },
                ],
                schema: Some(SchemaName::CheckoutSession),
                upstream_path: None,
            },
            EndpointConfig {
                name: "create-portal-session".to_string(),
                path: "/api/create-portal-session".to_string(),
                methods: vec!["POST".to_string()],
                steps: vec![
                    StepConfig::RateLimit {
                        policies: vec![ip_rule("api")],
                    },
                    StepConfig::Auth,
                ],
                schema: Some(SchemaName::PortalSession),
                upstream_path: None,
            },
            EndpointConfig {
                name: "subscription-status".to_string(),
                path: "/api/subscription-status".to_string(),
                methods: vec!["GET".to_string()],
                steps: vec![
                    StepConfig::RateLimit {
                        policies: vec![ip_rule("api")],
                    },
                    StepConfig::Auth,
                ],
                schema: Some(SchemaName::SubscriptionQuery),
                upstream_path: None,
            },
        ])
    }
}
