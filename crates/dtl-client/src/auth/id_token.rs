//! ID token decoding
//!
//! Only the payload segment is read; the signature is not verified. A token
//! that cannot be decoded is logged and skipped, it never fails the token
//! acquisition that carried it.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Identity fields extracted from an ID token.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenInfo {
    pub user_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_user_id_displayable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
}

/// Decode an encoded `header.payload.signature` ID token.
pub fn parse_id_token(encoded: &str) -> Option<IdTokenInfo> {
    let Some(payload) = crack_jwt(encoded) else {
        warn!("the returned id_token is not parseable");
        return None;
    };

    let Some(decoded) = decode_segment(payload) else {
        warn!("the returned id_token could not be base64 url safe decoded");
        return None;
    };

    match serde_json::from_slice::<Value>(&decoded) {
        Ok(Value::Object(claims)) => Some(extract_values(&claims)),
        _ => {
            warn!("the returned id_token payload is not a JSON object");
            None
        }
    }
}

/// Return the payload segment of a three-part JWT.
fn crack_jwt(token: &str) -> Option<&str> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.chars().any(char::is_whitespace)) {
        return None;
    }
    let payload = parts[1];
    (!payload.is_empty()).then_some(payload)
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()
}

fn extract_values(claims: &Map<String, Value>) -> IdTokenInfo {
    let claim = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);

    let (user_id, is_user_id_displayable) = if let Some(upn) = claim("upn") {
        (upn, true)
    } else if let Some(email) = claim("email") {
        (email, true)
    } else if let Some(sub) = claim("sub") {
        (sub, false)
    } else {
        (uuid::Uuid::new_v4().to_string(), false)
    };

    IdTokenInfo {
        user_id,
        is_user_id_displayable,
        tenant_id: claim("tid"),
        given_name: claim("given_name"),
        family_name: claim("family_name"),
        identity_provider: claim("idp"),
    }
}

#[cfg(test)]
pub(crate) fn encode_for_test(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"JWT","alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}
