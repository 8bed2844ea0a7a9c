//! Request gateway library.
//!
//! Admits or rejects requests to a small set of billing endpoints before
//! forwarding them upstream.
//!
//! ```text
//!     Client Request
//!         │
//!         ▼
//!     http::server (router, request ID, tracing)
//!         │
//!         ▼
//!     http::endpoint (preflight, method gate, body limit)
//!         │
//!         ▼
//!     http::pipeline ── rate limit ── auth ── schema ──▶ terminal response
//!         │                 │           │        │
//!         │            security::*  security::*  validation::*
//!         ▼
//!     http::upstream ──▶ Upstream service
//!
//!     Cross-cutting: config, observability (logs, metrics, security events), lifecycle
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod validation;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
