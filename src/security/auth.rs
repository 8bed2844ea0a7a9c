//! Bearer credential verification at the gateway edge.
//!
//! # Design Decisions
//! - Structural check only: three dot-separated segments, payload decodes to
//!   a JSON object carrying a `subject` claim (`sub` accepted as fallback)
//! - The signature is NOT verified here. The endpoint's own privileged lookup
//!   against the identity platform verifies it, so both layers must stay
//! - No role resolution; roles live behind the persistence layer

use axum::http::{header, HeaderMap};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::http::error::ErrorCode;

pub const BEARER_PREFIX: &str = "Bearer ";

const SUBJECT_CLAIMS: [&str; 2] = ["subject", "sub"];
const SESSION_CLAIM: &str = "session_id";

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Identity read from an accepted bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    pub subject_id: String,
    pub session_id: Option<String>,
}

/// Why a request was refused at the auth step. All map to 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization header with a Bearer token is required")]
    MissingToken,
    #[error("Authorization token is malformed")]
    InvalidToken,
    #[error("Authorization token does not identify a subject")]
    InvalidPayload,
    #[error("Authorization token payload could not be decoded")]
    DecodeError,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::MissingToken => ErrorCode::MissingAuthToken,
            AuthError::InvalidToken => ErrorCode::InvalidAuthToken,
            AuthError::InvalidPayload => ErrorCode::InvalidTokenPayload,
            AuthError::DecodeError => ErrorCode::TokenDecodeError,
        }
    }
}

/// Extract and structurally validate the bearer credential in `headers`.
pub fn authenticate(headers: &HeaderMap) -> Result<AuthenticatedSubject, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::InvalidToken);
    }

    let payload = decode_payload(segments[1])?;
    let claims = payload.as_object().ok_or(AuthError::InvalidPayload)?;
    let subject_id = SUBJECT_CLAIMS
        .iter()
        .find_map(|claim| {
            claims
                .get(*claim)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
        .ok_or(AuthError::InvalidPayload)?
        .to_string();
    let session_id = claims
        .get(SESSION_CLAIM)
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AuthenticatedSubject {
        subject_id,
        session_id,
    })
}

/// The raw token after `Bearer `, if the header has that shape.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
}

fn decode_payload(segment: &str) -> Result<Value, AuthError> {
    let bytes = URL_SAFE_LENIENT
        .decode(segment)
        .or_else(|_| STANDARD_LENIENT.decode(segment))
        .map_err(|_| AuthError::DecodeError)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::DecodeError)
}
