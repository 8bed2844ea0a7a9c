//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), or built-in defaults
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! process environment
//!     → env.rs (required variables, all-or-nothing)
//!     → PlatformEnv
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A missing environment variable is fatal at startup, never per request

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use env::PlatformEnv;
pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{
    CorsConfig, EndpointConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PolicyConfig, RateLimitRuleConfig, StepConfig,
};
pub use validation::{validate_config, ConfigIssue};
