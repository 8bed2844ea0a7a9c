//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → context.rs (client IP via trusted proxies, user agent)
//!     → rate_limit.rs (fixed-window quota over store.rs)
//!     → auth.rs (bearer token structure, subject claim)
//!     → headers.rs (security, CORS, quota headers on the way out)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input beyond what is checked here

pub mod auth;
pub mod clock;
pub mod context;
pub mod headers;
pub mod rate_limit;
pub mod store;

pub use auth::{authenticate, AuthError, AuthenticatedSubject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Role, SecurityContext, TrustedProxies};
pub use headers::CorsPolicy;
pub use rate_limit::{PolicyError, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use store::{CounterStore, InMemoryCounterStore, RateLimitRecord};
