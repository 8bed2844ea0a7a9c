//! Concrete pipeline steps.
//!
//! Each step logs its own rejections as security events and returns the
//! terminal response the client sees.

pub mod auth;
pub mod rate_limit;
pub mod validate;

pub use auth::AuthStep;
pub use rate_limit::{KeySource, RateLimitRule, RateLimitStep};
pub use validate::SchemaStep;
