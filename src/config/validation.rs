//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (steps reference existing policies)
//! - Validate value ranges (windows > 0, addresses parse)
//! - Detect conflicting endpoint paths and shared counter prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use axum::http::Method;

use crate::config::schema::{GatewayConfig, StepConfig};

/// One semantic problem, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        issues.push(ConfigIssue::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        issues.push(ConfigIssue::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }
    if config.security.max_body_bytes == 0 {
        issues.push(ConfigIssue::new("security.max_body_bytes", "must be greater than 0"));
    }
    let mut proxies = HashSet::new();
    for proxy in &config.security.trusted_proxies {
        if proxy.is_unspecified() {
            issues.push(ConfigIssue::new(
                "security.trusted_proxies",
                format!("'{proxy}' is not a peer address"),
            ));
        } else if !proxies.insert(proxy) {
            issues.push(ConfigIssue::new(
                "security.trusted_proxies",
                format!("duplicate proxy '{proxy}'"),
            ));
        }
    }
    if config.counter_store.sweep_interval == 0 {
        issues.push(ConfigIssue::new("counter_store.sweep_interval", "must be greater than 0"));
    }
    if config.security_log.queue_capacity == 0 {
        issues.push(ConfigIssue::new("security_log.queue_capacity", "must be greater than 0"));
    }

    let mut prefixes: HashMap<&str, &str> = HashMap::new();
    for (name, policy) in config.rate_limits.iter() {
        let field = format!("rate_limits.{name}");
        if let Some(other) = prefixes.insert(policy.prefix(name), name) {
            issues.push(ConfigIssue::new(
                format!("{field}.key_prefix"),
                format!("'{}' is already used by policy '{other}'", policy.prefix(name)),
            ));
        }
        if policy.window_ms == 0 {
            issues.push(ConfigIssue::new(format!("{field}.window_ms"), "must be greater than 0"));
        }
        if policy.max_requests == 0 {
            issues.push(ConfigIssue::new(
                format!("{field}.max_requests"),
                "must be greater than 0",
            ));
        }
        if policy.key_prefix.as_deref().is_some_and(str::is_empty) {
            issues.push(ConfigIssue::new(format!("{field}.key_prefix"), "must not be empty"));
        }
    }

    let mut paths = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let field = format!("endpoints[{i}]");
        if endpoint.name.is_empty() {
            issues.push(ConfigIssue::new(format!("{field}.name"), "must not be empty"));
        }
        if !endpoint.path.starts_with('/') {
            issues.push(ConfigIssue::new(
                format!("{field}.path"),
                format!("'{}' must start with '/'", endpoint.path),
            ));
        } else if endpoint.path == "/health" {
            issues.push(ConfigIssue::new(format!("{field}.path"), "'/health' is reserved"));
        } else if !paths.insert(endpoint.path.as_str()) {
            issues.push(ConfigIssue::new(
                format!("{field}.path"),
                format!("duplicate path '{}'", endpoint.path),
            ));
        }
        if endpoint.methods.is_empty() {
            issues.push(ConfigIssue::new(format!("{field}.methods"), "must not be empty"));
        }
        for method in &endpoint.methods {
            if method.parse::<Method>().is_err() {
                issues.push(ConfigIssue::new(
                    format!("{field}.methods"),
                    format!("'{method}' is not an HTTP method"),
                ));
            }
        }
        for (j, step) in endpoint.steps.iter().enumerate() {
            if let StepConfig::RateLimit { policies } = step {
                if policies.is_empty() {
                    issues.push(ConfigIssue::new(
                        format!("{field}.steps[{j}].policies"),
                        "must not be empty",
                    ));
                }
                for rule in policies {
                    if config.rate_limits.get(&rule.policy).is_none() {
                        issues.push(ConfigIssue::new(
                            format!("{field}.steps[{j}].policies"),
                            format!("unknown policy '{}'", rule.policy),
                        ));
                    }
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EndpointConfig, PolicyConfig, RateLimitRuleConfig};
    use crate::http::middleware::KeySource;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_all_issues_reported() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.rate_limits.0.insert(
            "broken".into(),
            PolicyConfig {
                window_ms: 0,
                max_requests: 0,
                key_prefix: Some(String::new()),
            },
        );
        config.endpoints.0.push(EndpointConfig {
            name: "dup".into(),
            path: "/api/create-portal-session".into(),
            methods: vec!["NOT A METHOD".into()],
            steps: vec![StepConfig::RateLimit {
                policies: vec![RateLimitRuleConfig {
                    policy: "missing".into(),
                    key: KeySource::Ip,
                }],
            }],
            schema: None,
            upstream_path: None,
        });

        let issues = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"rate_limits.broken.window_ms"));
        assert!(fields.contains(&"rate_limits.broken.max_requests"));
        assert!(fields.contains(&"rate_limits.broken.key_prefix"));
        assert!(fields.contains(&"endpoints[3].path"));
        assert!(fields.contains(&"endpoints[3].methods"));
        assert!(fields.contains(&"endpoints[3].steps[0].policies"));
        assert_eq!(issues.len(), 7);
    }

    #[test]
    fn test_shared_key_prefix_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limits.0.insert(
            "burst".into(),
            PolicyConfig {
                window_ms: 1_000,
                max_requests: 5,
                key_prefix: Some("api".into()),
            },
        );
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "rate_limits.burst.key_prefix");
        assert!(issues[0].message.contains("'api'"), "{}", issues[0]);
    }

    #[test]
    fn test_trusted_proxies_checked() {
        let mut config = GatewayConfig::default();
        config.security.trusted_proxies = vec![
            "10.0.0.5".parse().unwrap(),
            "0.0.0.0".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        ];
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.field == "security.trusted_proxies"));

        config.security.trusted_proxies = vec!["10.0.0.5".parse().unwrap(), "::1".parse().unwrap()];
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = GatewayConfig::default();
        config.endpoints.0[0].path = "api/x".into();
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues[0].field, "endpoints[0].path");
    }
}
