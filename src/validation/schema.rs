//! Typed request schemas with field-level error reporting.
//!
//! # Data Flow
//! ```text
//! JSON object (body, or query map of strings)
//!     → query coercion (integer / boolean fields only)
//!     → per-field type check with serde          → InvalidType errors
//!     → undeclared keys, strict schemas only     → UnrecognizedKeys error
//!     → deserialize declared fields into T
//!     → T::validate() (`validator` derive rules) → range / length / format errors
//!     → Valid{data: T} | Invalid{errors}
//! ```
//!
//! # Design Decisions
//! - Every failing field is reported, never just the first
//! - Errors come out in declaration order, unknown keys last, so the same
//!   input always yields the same list
//! - Valid data keeps only declared fields
//! - Schema fields are `Option`; required ones carry `#[validate(required)]`
//!   so a missing field is reported alongside the other rule failures

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError, ValidationErrors};

/// Machine-readable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    InvalidType,
    InvalidString,
    TooSmall,
    TooBig,
    UnrecognizedKeys,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: FieldErrorCode,
}

impl FieldError {
    fn new(field: &str, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            code,
        }
    }
}

/// Either typed data or the complete list of field errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome<T> {
    Valid { data: T },
    Invalid { errors: Vec<FieldError> },
}

impl<T> ValidationOutcome<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }

    pub fn into_result(self) -> Result<T, Vec<FieldError>> {
        match self {
            ValidationOutcome::Valid { data } => Ok(data),
            ValidationOutcome::Invalid { errors } => Err(errors),
        }
    }
}

/// Where the input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Body,
    Query,
}

/// JSON type a field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    fn check(&self, value: &Value) -> Result<(), serde_json::Error> {
        match self {
            FieldType::String => String::deserialize(value).map(drop),
            FieldType::Integer => i64::deserialize(value).map(drop),
            FieldType::Boolean => bool::deserialize(value).map(drop),
        }
    }

    /// Parse query text into the declared type, leaving anything else as is.
    fn coerce(&self, value: Value) -> Value {
        let parsed = match (self, value.as_str()) {
            (FieldType::Integer, Some(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (FieldType::Boolean, Some("true")) => Some(Value::Bool(true)),
            (FieldType::Boolean, Some("false")) => Some(Value::Bool(false)),
            _ => None,
        };
        parsed.unwrap_or(value)
    }
}

/// One declared input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Key in the JSON input.
    pub name: &'static str,
    /// Struct field name, the key `validator` reports errors under.
    pub attr: &'static str,
    pub kind: FieldType,
}

impl FieldSpec {
    pub const fn new(name: &'static str, attr: &'static str, kind: FieldType) -> Self {
        Self { name, attr, kind }
    }
}

/// A typed request whose rules are declared with `#[derive(Validate)]`.
pub trait RequestSchema: DeserializeOwned + Serialize + Validate {
    /// Label for logs and security events.
    const NAME: &'static str;

    /// Declared fields, in reporting order.
    const FIELDS: &'static [FieldSpec];

    /// Reject undeclared keys. The type must also carry
    /// `#[serde(deny_unknown_fields)]`.
    const STRICT: bool = false;
}

/// Check `input` against `T`, collecting every field error.
pub fn validate<T: RequestSchema>(input: &Value, source: InputSource) -> ValidationOutcome<T> {
    let Some(object) = input.as_object() else {
        return ValidationOutcome::Invalid {
            errors: vec![FieldError::new(
                "",
                FieldErrorCode::InvalidType,
                format!("Expected object, received {}", type_name(input)),
            )],
        };
    };

    let mut errors = Vec::new();
    let mut declared = Map::new();
    let mut mistyped = Vec::new();

    for spec in T::FIELDS {
        let Some(value) = object.get(spec.name) else {
            continue;
        };
        let value = match source {
            InputSource::Query => spec.kind.coerce(value.clone()),
            InputSource::Body => value.clone(),
        };
        match spec.kind.check(&value) {
            Ok(()) => {
                declared.insert(spec.name.to_string(), value);
            }
            Err(e) => {
                errors.push(FieldError::new(spec.name, FieldErrorCode::InvalidType, e.to_string()));
                mistyped.push(spec.name);
            }
        }
    }

    if T::STRICT {
        let unknown: Vec<(&String, &Value)> = object
            .iter()
            .filter(|(key, _)| !T::FIELDS.iter().any(|f| f.name == key.as_str()))
            .collect();
        if !unknown.is_empty() {
            let mut with_unknown = declared.clone();
            for (key, value) in unknown {
                with_unknown.insert(key.clone(), value.clone());
            }
            if let Err(e) = serde_json::from_value::<T>(Value::Object(with_unknown)) {
                errors.push(FieldError::new("", FieldErrorCode::UnrecognizedKeys, e.to_string()));
            }
        }
    }

    let data: T = match serde_json::from_value(Value::Object(declared)) {
        Ok(data) => data,
        Err(e) => {
            errors.push(FieldError::new("", FieldErrorCode::Custom, e.to_string()));
            return ValidationOutcome::Invalid { errors };
        }
    };

    if let Err(rule_errors) = data.validate() {
        errors.extend(describe_all::<T>(&rule_errors, &mistyped));
    }

    // Stable: type errors stay ahead of rule errors for the same field
    errors.sort_by_key(|e| {
        T::FIELDS
            .iter()
            .position(|f| f.name == e.field)
            .unwrap_or(usize::MAX)
    });

    if errors.is_empty() {
        ValidationOutcome::Valid { data }
    } else {
        ValidationOutcome::Invalid { errors }
    }
}

/// Like [`validate`], returning the cleaned data as JSON.
pub fn validate_to_value<T: RequestSchema>(input: &Value, source: InputSource) -> ValidationOutcome<Value> {
    match validate::<T>(input, source) {
        ValidationOutcome::Valid { data } => match serde_json::to_value(&data) {
            Ok(value) => ValidationOutcome::Valid { data: value },
            Err(e) => ValidationOutcome::Invalid {
                errors: vec![FieldError::new("", FieldErrorCode::Custom, e.to_string())],
            },
        },
        ValidationOutcome::Invalid { errors } => ValidationOutcome::Invalid { errors },
    }
}

fn describe_all<T: RequestSchema>(errors: &ValidationErrors, mistyped: &[&str]) -> Vec<FieldError> {
    let mut out = Vec::new();
    for (attr, field_errors) in errors.field_errors() {
        let attr: &str = &attr;
        let name = T::FIELDS
            .iter()
            .find(|f| f.attr == attr || f.name == attr)
            .map(|f| f.name.to_string())
            .unwrap_or_else(|| attr.to_string());
        for error in field_errors.iter() {
            // Already reported as a type error
            if error.code == "required" && mistyped.contains(&name.as_str()) {
                continue;
            }
            out.push(describe(&name, error));
        }
    }
    out
}

fn describe(field: &str, error: &ValidationError) -> FieldError {
    let param = |key: &str| error.params.get(key).and_then(Value::as_f64);

    match &*error.code {
        "required" => FieldError::new(field, FieldErrorCode::InvalidType, "Required"),
        "range" => {
            let below = match (param("value"), param("min")) {
                (Some(value), Some(min)) => value < min,
                (None, Some(_)) => param("max").is_none(),
                _ => false,
            };
            if below {
                FieldError::new(
                    field,
                    FieldErrorCode::TooSmall,
                    format!("Number must be greater than or equal to {}", bound(param("min"))),
                )
            } else {
                FieldError::new(
                    field,
                    FieldErrorCode::TooBig,
                    format!("Number must be less than or equal to {}", bound(param("max"))),
                )
            }
        }
        "length" => {
            let len = error
                .params
                .get("value")
                .and_then(Value::as_str)
                .map(|s| s.chars().count() as f64);
            let below = match (len, param("min")) {
                (Some(len), Some(min)) => len < min,
                (None, Some(_)) => param("max").is_none(),
                _ => false,
            };
            if below {
                FieldError::new(
                    field,
                    FieldErrorCode::TooSmall,
                    format!("String must contain at least {} character(s)", bound(param("min"))),
                )
            } else {
                FieldError::new(
                    field,
                    FieldErrorCode::TooBig,
                    format!("String must contain at most {} character(s)", bound(param("max"))),
                )
            }
        }
        "url" | "http_url" => FieldError::new(field, FieldErrorCode::InvalidString, "Invalid url"),
        "regex" => FieldError::new(field, FieldErrorCode::InvalidString, "Invalid"),
        code => FieldError::new(
            field,
            FieldErrorCode::Custom,
            error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| code.to_string()),
        ),
    }
}

/// Rule bounds print as integers when they are whole.
fn bound(value: Option<f64>) -> String {
    match value {
        Some(n) if n.fract() == 0.0 => format!("{}", n as i64),
        Some(n) => n.to_string(),
        None => "?".to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
