//! The fixed set of endpoint schemas.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use validator::{Validate, ValidationError};

use crate::validation::schema::{
    validate_to_value, FieldSpec, FieldType, InputSource, RequestSchema, ValidationOutcome,
};

static PRICE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^price_[A-Za-z0-9]+$").expect("PRICE_ID: invalid regex pattern")
});

/// Schemas an endpoint may reference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaName {
    CheckoutSession,
    PortalSession,
    SubscriptionQuery,
}

impl SchemaName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaName::CheckoutSession => CheckoutSessionRequest::NAME,
            SchemaName::PortalSession => PortalSessionRequest::NAME,
            SchemaName::SubscriptionQuery => SubscriptionQuery::NAME,
        }
    }

    /// Validate `input`, returning the cleaned data as JSON.
    pub fn validate(&self, input: &Value, source: InputSource) -> ValidationOutcome<Value> {
        match self {
            SchemaName::CheckoutSession => validate_to_value::<CheckoutSessionRequest>(input, source),
            SchemaName::PortalSession => validate_to_value::<PortalSessionRequest>(input, source),
            SchemaName::SubscriptionQuery => validate_to_value::<SubscriptionQuery>(input, source),
        }
    }
}

/// Redirect targets must be http(s); `url` alone admits `javascript:` and friends.
fn http_url(value: &str) -> Result<(), ValidationError> {
    match Url::parse(value) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => Err(ValidationError::new("http_url")),
        // Unparseable values are reported by the `url` rule
        _ => Ok(()),
    }
}

/// Body of a checkout-session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    #[validate(required, regex(path = *PRICE_ID))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_id: Option<String>,

    #[validate(url, length(max = 2048), custom(function = "http_url"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,

    #[validate(url, length(max = 2048), custom(function = "http_url"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_url: Option<String>,

    #[validate(range(min = 1, max = 100))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl RequestSchema for CheckoutSessionRequest {
    const NAME: &'static str = "checkout_session";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("priceId", "price_id", FieldType::String),
        FieldSpec::new("successUrl", "success_url", FieldType::String),
        FieldSpec::new("cancelUrl", "cancel_url", FieldType::String),
        FieldSpec::new("quantity", "quantity", FieldType::Integer),
    ];
}

/// Body of a billing-portal request. Nothing but the return URL is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortalSessionRequest {
    #[validate(url, length(max = 2048), custom(function = "http_url"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
}

impl RequestSchema for PortalSessionRequest {
    const NAME: &'static str = "portal_session";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::new("returnUrl", "return_url", FieldType::String)];
    const STRICT: bool = true;
}

/// Query of a subscription-status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_history: Option<bool>,

    #[validate(range(min = 1, max = 100))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl RequestSchema for SubscriptionQuery {
    const NAME: &'static str = "subscription_query";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("includeHistory", "include_history", FieldType::Boolean),
        FieldSpec::new("limit", "limit", FieldType::Integer),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::schema::{validate, FieldErrorCode};
    use serde_json::json;

    #[test]
    fn test_checkout_typed_extraction() {
        let req = validate::<CheckoutSessionRequest>(
            &json!({"priceId": "price_1Abc", "successUrl": "https://app.example/ok"}),
            InputSource::Body,
        )
        .into_result()
        .unwrap();
        assert_eq!(req.price_id.as_deref(), Some("price_1Abc"));
        assert_eq!(req.success_url.as_deref(), Some("https://app.example/ok"));
        assert_eq!(req.cancel_url, None);
    }

    #[test]
    fn test_checkout_rejects_bad_price() {
        let errors = SchemaName::CheckoutSession
            .validate(&json!({"priceId": "bad"}), InputSource::Body)
            .into_result()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "priceId");
        assert_eq!(errors[0].code, FieldErrorCode::InvalidString);
        assert_eq!(errors[0].message, "Invalid");
    }

    #[test]
    fn test_checkout_reports_every_field() {
        let errors = SchemaName::CheckoutSession
            .validate(
                &json!({"successUrl": "not a url", "cancelUrl": "javascript:alert(1)", "quantity": 101}),
                InputSource::Body,
            )
            .into_result()
            .unwrap_err();
        let summary: Vec<(&str, FieldErrorCode)> =
            errors.iter().map(|e| (e.field.as_str(), e.code)).collect();
        assert_eq!(
            summary,
            vec![
                ("priceId", FieldErrorCode::InvalidType),
                ("successUrl", FieldErrorCode::InvalidString),
                ("cancelUrl", FieldErrorCode::InvalidString),
                ("quantity", FieldErrorCode::TooBig),
            ]
        );
        assert_eq!(errors[3].message, "Number must be less than or equal to 100");
    }

    #[test]
    fn test_cleaned_checkout_omits_absent_fields() {
        let data = SchemaName::CheckoutSession
            .validate(&json!({"priceId": "price_1", "quantity": 3, "coupon": "X"}), InputSource::Body)
            .into_result()
            .unwrap();
        assert_eq!(data, json!({"priceId": "price_1", "quantity": 3}));
    }

    #[test]
    fn test_portal_session_is_strict() {
        let errors = SchemaName::PortalSession
            .validate(
                &json!({"returnUrl": "https://app.example", "customerId": "cus_1"}),
                InputSource::Body,
            )
            .into_result()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, FieldErrorCode::UnrecognizedKeys);

        assert!(SchemaName::PortalSession
            .validate(&json!({}), InputSource::Body)
            .is_valid());
    }

    #[test]
    fn test_subscription_query_coerced() {
        let data = SchemaName::SubscriptionQuery
            .validate(&json!({"includeHistory": "false", "limit": "10"}), InputSource::Query)
            .into_result()
            .unwrap();
        assert_eq!(data, json!({"includeHistory": false, "limit": 10}));
    }

    #[test]
    fn test_schema_names_from_config_strings() {
        let name: SchemaName = serde_json::from_value(json!("portal_session")).unwrap();
        assert_eq!(name, SchemaName::PortalSession);
        assert_eq!(name.as_str(), "portal_session");
    }
}
