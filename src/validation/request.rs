//! Request-level validation: input source selection, content type, JSON parsing.
//!
//! # Design Decisions
//! - Read-only methods validate the query string as a flat key → string map
//! - Body-bearing methods must declare JSON; the body is then parsed once
//! - Repeated query keys keep the last value

use axum::http::{header, HeaderMap, Method, Uri};
use serde_json::{Map, Value};

use crate::http::error::{ApiError, ErrorCode};
use crate::validation::registry::SchemaName;
use crate::validation::schema::{InputSource, ValidationOutcome};

/// Whether `method` carries its input in the query string.
pub fn reads_query(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS].contains(method)
}

/// The query string as a flat JSON object of strings.
pub fn query_map(uri: &Uri) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            map.insert(key.into_owned(), Value::String(value.into_owned()));
        }
    }
    map
}

pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Validate a request's input against `schema`, returning the cleaned data.
pub fn validate_request(
    schema: SchemaName,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Value, ApiError> {
    let (input, source) = if reads_query(method) {
        (Value::Object(query_map(uri)), InputSource::Query)
    } else {
        if !is_json_content_type(headers) {
            return Err(ApiError::new(
                ErrorCode::InvalidContentType,
                "Content-Type must be application/json",
            ));
        }
        let parsed: Value = serde_json::from_slice(body).map_err(|e| {
            ApiError::new(ErrorCode::InvalidJson, "Request body is not valid JSON")
                .with_details(serde_json::json!({ "reason": e.to_string() }))
        })?;
        (parsed, InputSource::Body)
    };

    match schema.validate(&input, source) {
        ValidationOutcome::Valid { data } => Ok(data),
        ValidationOutcome::Invalid { errors } => Err(ApiError::validation(&errors)),
    }
}
