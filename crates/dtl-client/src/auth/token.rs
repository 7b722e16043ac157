//! Canonical token and user-code records, and their wire-format parsing
//!
//! The token endpoint speaks snake_case JSON (`access_token`, `expires_in`,
//! ...) with numbers that may arrive as strings. The records here are the
//! normalized camelCase form handed to callers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::id_token::{IdTokenInfo, parse_id_token};
use crate::error::ClientError;

/// Result of a token acquisition.
///
/// On success `access_token` and `token_type` are set; on failure `error` is
/// set and `access_token` is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(flatten)]
    pub id_token: Option<IdTokenInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.access_token.is_some()
    }

    /// A failed acquisition carrying only error details.
    pub fn failure(error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_description: description,
            ..Self::default()
        }
    }

    /// Build a token record from a token endpoint body without further
    /// normalization. Used by the client-credentials flow.
    pub fn from_wire(body: &str) -> Result<Self, ClientError> {
        let wire = parse_object(body, "token")?;
        Ok(Self::map_fields(&wire))
    }

    /// Build a failure record from an error body. Only error-related fields
    /// are kept.
    pub(crate) fn from_error_wire(wire: &Map<String, Value>) -> Self {
        Self::failure(
            string_field(wire, "error").unwrap_or_else(|| "unknown_error".to_string()),
            string_field(wire, "error_description"),
        )
    }

    fn map_fields(wire: &Map<String, Value>) -> Self {
        Self {
            token_type: string_field(wire, "token_type"),
            access_token: string_field(wire, "access_token"),
            refresh_token: string_field(wire, "refresh_token"),
            created_on: string_field(wire, "created_on"),
            expires_on: string_field(wire, "expires_on"),
            expires_in: wire.get("expires_in").and_then(as_int),
            resource: string_field(wire, "resource"),
            id_token: None,
            error: string_field(wire, "error"),
            error_description: string_field(wire, "error_description"),
        }
    }
}

/// Validate and normalize a successful device-code token response.
///
/// `token_type` and `access_token` are required. `created_on` (epoch millis)
/// becomes an RFC 3339 timestamp. `expires_on` is taken from the wire (epoch
/// seconds) or computed as `created_on + expires_in`, falling back to
/// `now + expires_in` when the server did not send `created_on`.
pub fn validate_token_response(body: &str, now: DateTime<Utc>) -> Result<TokenResponse, ClientError> {
    let mut wire = parse_object(body, "token")?;
    parse_optional_ints(&mut wire, &["expires_on", "expires_in", "created_on"])?;

    for required in ["token_type", "access_token"] {
        if string_field(&wire, required).is_none() {
            return Err(ClientError::malformed(format!(
                "token response is missing {required}"
            )));
        }
    }

    let created_on = match wire.get("created_on").and_then(Value::as_i64) {
        Some(millis) => Some(DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            ClientError::malformed("created_on is not a valid timestamp")
        })?),
        None => None,
    };
    let expires_in = wire.get("expires_in").and_then(Value::as_i64);
    let expires_on = match (wire.get("expires_on").and_then(Value::as_i64), expires_in) {
        (Some(secs), _) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            ClientError::malformed("expires_on is not a valid timestamp")
        })?),
        (None, Some(secs)) => Some(
            Duration::try_seconds(secs)
                .and_then(|offset| created_on.unwrap_or(now).checked_add_signed(offset))
                .ok_or_else(|| ClientError::malformed("expires_in is out of range"))?,
        ),
        (None, None) => None,
    };

    let mut token = TokenResponse::map_fields(&wire);
    token.created_on = created_on.map(|t| t.to_rfc3339());
    token.expires_on = expires_on.map(|t| t.to_rfc3339());
    token.id_token = string_field(&wire, "id_token").and_then(|t| parse_id_token(&t));
    Ok(token)
}

/// Device-code details the user needs to complete sign-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCodeInfo {
    pub device_code: String,
    pub user_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    /// Seconds between token polls
    pub interval: u64,
    /// Seconds until the device code expires
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UserCodeInfo {
    /// Parse a device-code endpoint response.
    pub fn from_wire(body: &str) -> Result<Self, ClientError> {
        let mut wire = parse_object(body, "device code")?;
        parse_optional_ints(&mut wire, &["expires_in", "interval"])?;

        let required_string = |key: &str| {
            string_field(&wire, key).ok_or_else(|| {
                ClientError::malformed(format!("device code response is missing {key}"))
            })
        };
        let required_uint = |key: &str| {
            wire.get(key).and_then(Value::as_u64).ok_or_else(|| {
                ClientError::malformed(format!("device code response is missing {key}"))
            })
        };

        Ok(Self {
            device_code: required_string("device_code")?,
            user_code: required_string("user_code")?,
            verification_url: string_field(&wire, "verification_url")
                .or_else(|| string_field(&wire, "verification_uri")),
            interval: required_uint("interval")?,
            expires_in: required_uint("expires_in")?,
            message: string_field(&wire, "message"),
        })
    }
}

pub(crate) fn parse_object(body: &str, what: &str) -> Result<Map<String, Value>, ClientError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ClientError::malformed(format!(
            "the {what} response returned from the server is unparsable as JSON"
        ))),
    }
}

/// Coerce integer-valued fields that may arrive as strings.
fn parse_optional_ints(wire: &mut Map<String, Value>, keys: &[&str]) -> Result<(), ClientError> {
    for key in keys {
        if let Some(value) = wire.get_mut(*key) {
            let parsed = as_int(value).ok_or_else(|| {
                ClientError::malformed(format!("{key} could not be parsed as an int"))
            })?;
            *value = Value::from(parsed);
        }
    }
    Ok(())
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn string_field(wire: &Map<String, Value>, key: &str) -> Option<String> {
    match wire.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
