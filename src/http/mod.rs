//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID and trace layers)
//!     → endpoint.rs (preflight, method gate, body limit, monitoring)
//!     → pipeline.rs (ordered middleware: middleware/*)
//!     → upstream.rs (forward admitted request)
//!     → error.rs / response.rs (envelopes, security headers)
//!     → Send to client
//! ```

pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use endpoint::{Endpoint, EndpointHandler, GatewayShared};
pub use error::{ApiError, ErrorCode};
pub use pipeline::{
    AdmittedRequest, GatewayRequest, Middleware, MiddlewareResult, Pipeline, PipelineOutcome,
    RawRequest,
};
pub use request::X_REQUEST_ID;
pub use server::{build_endpoints, build_router, HttpServer};
pub use upstream::{Upstream, UpstreamHandler};
