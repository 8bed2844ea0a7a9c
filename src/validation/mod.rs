//! Input validation subsystem.
//!
//! # Data Flow
//! ```text
//! GatewayRequest
//!     → request.rs (pick query or JSON body, check content type, parse)
//!     → schema.rs (serde type checks, `validator` rules → Valid{data} | Invalid{errors})
//!     → cleaned data attached to the request, or 400 VALIDATION_ERROR
//! ```
//!
//! # Design Decisions
//! - Schemas are typed structs deriving `Validate` (registry.rs), fixed per endpoint
//! - Validation is pure: same input, same outcome

pub mod registry;
pub mod request;
pub mod schema;

pub use registry::{CheckoutSessionRequest, PortalSessionRequest, SchemaName, SubscriptionQuery};
pub use request::validate_request;
pub use schema::{
    validate, validate_to_value, FieldError, FieldErrorCode, FieldSpec, FieldType, InputSource,
    RequestSchema, ValidationOutcome,
};
