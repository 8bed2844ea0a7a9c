//! Per-request security context.

use std::net::IpAddr;

use axum::http::{header, HeaderMap};
use serde::Serialize;

use crate::security::auth::AuthenticatedSubject;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Placeholder when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    Authenticated,
}

/// Who is calling and from where. Built before any middleware runs; the
/// subject fields are filled in only by a successful auth step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityContext {
    pub subject_id: Option<String>,
    pub role: Role,
    pub session_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

impl SecurityContext {
    /// Anonymous context for a request from `ip_address`.
    pub fn new(headers: &HeaderMap, ip_address: impl Into<String>) -> Self {
        Self {
            subject_id: None,
            role: Role::Anonymous,
            session_id: None,
            ip_address: ip_address.into(),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    pub fn attach_subject(&mut self, subject: AuthenticatedSubject) {
        self.subject_id = Some(subject.subject_id);
        self.session_id = subject.session_id;
        self.role = Role::Authenticated;
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject_id.is_some()
    }
}

/// Peers allowed to report the client address in forwarding headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    addrs: Vec<IpAddr>,
}

impl TrustedProxies {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(ip)
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Client address for a request from `peer`.
    ///
    /// `X-Forwarded-For` (first entry) and then `X-Real-IP` are read only when
    /// the socket peer is a trusted proxy. Any other peer is the client. With
    /// no peer at all the address is `unknown`.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        let Some(peer) = peer else {
            return UNKNOWN_IP.to_string();
        };
        if !self.contains(&peer) {
            return peer.to_string();
        }
        forwarded_ip(headers).unwrap_or_else(|| peer.to_string())
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header_value(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_value(X_REAL_IP))
        .map(str::to_string)
}
