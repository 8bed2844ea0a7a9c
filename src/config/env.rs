//! Startup environment contract.
//!
//! The gateway refuses to start unless every required variable is present.
//! Missing names are reported together.

use std::collections::BTreeMap;
use std::fmt;

use url::Url;

use crate::config::loader::ConfigError;

pub const UPSTREAM_URL: &str = "GATEWAY_UPSTREAM_URL";
pub const IDENTITY_URL: &str = "GATEWAY_IDENTITY_URL";
pub const IDENTITY_KEY: &str = "GATEWAY_IDENTITY_KEY";

/// Platform endpoints and credentials read once at startup.
#[derive(Clone)]
pub struct PlatformEnv {
    pub upstream_url: Url,
    pub identity_url: Url,
    pub identity_key: String,
    /// Extra variables named in `environment.required`.
    pub extra: BTreeMap<String, String>,
}

impl PlatformEnv {
    pub fn from_env(required: &[String]) -> Result<Self, ConfigError> {
        Self::from_lookup(required, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(required: &[String], lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut fetch = |name: &str| {
            let value = get(name);
            if value.is_none() {
                missing.push(name.to_string());
            }
            value
        };

        let upstream = fetch(UPSTREAM_URL);
        let identity = fetch(IDENTITY_URL);
        let key = fetch(IDENTITY_KEY);
        let extra: BTreeMap<String, String> = required
            .iter()
            .filter_map(|name| fetch(name).map(|value| (name.clone(), value)))
            .collect();

        let (Some(upstream), Some(identity), Some(identity_key)) = (upstream, identity, key) else {
            return Err(ConfigError::MissingEnv(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv(missing));
        }

        Ok(Self {
            upstream_url: parse_url(UPSTREAM_URL, &upstream)?,
            identity_url: parse_url(IDENTITY_URL, &identity)?,
            identity_key,
            extra,
        })
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidEnv {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

impl fmt::Debug for PlatformEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformEnv")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("identity_url", &self.identity_url.as_str())
            .field("identity_key", &"<redacted>")
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}
