//! OAuth2 token endpoint client
//!
//! Speaks the Azure AD v1 token and device-code endpoints. Every call is a
//! single form-encoded POST; the device-code grant adds a polling loop on top.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use url::Url;

use super::authority::OAuthEndpoints;
use super::client_request;
use super::token::{TokenResponse, UserCodeInfo, parse_object, string_field, validate_token_response};
use crate::error::ClientError;
use crate::http::{HttpRequest, HttpResponse, Transport};

const AAD_API_VERSION: &str = "1.0";

/// Extra seconds added to the poll interval when the server answers `slow_down`.
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// What one device-code poll told us.
#[derive(Debug)]
enum PollOutcome {
    Token(TokenResponse),
    Pending,
    SlowDown,
    Denied(TokenResponse),
    NoAnswer,
}

pub struct OAuth2Client<'a> {
    transport: &'a dyn Transport,
    endpoints: &'a OAuthEndpoints,
}

impl<'a> OAuth2Client<'a> {
    pub fn new(transport: &'a dyn Transport, endpoints: &'a OAuthEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// Request a device code and user code.
    pub async fn get_user_code_info(
        &self,
        params: &[(&str, &str)],
    ) -> Result<UserCodeInfo, ClientError> {
        let url = versioned_api_url(&self.endpoints.device_code_endpoint)?;
        let resp = self.post_form(&url, params, "Get Device Code").await?;

        if !resp.is_success() {
            return Err(ClientError::auth(format!(
                "device code request returned HTTP {}{}",
                resp.status,
                error_detail(&resp)
            )));
        }

        UserCodeInfo::from_wire(&resp.body)
    }

    /// One round trip to the token endpoint, e.g. for the client credentials grant.
    ///
    /// An HTTP error status is a failed [`TokenResponse`], not an `Err`.
    pub async fn get_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, ClientError> {
        let url = versioned_api_url(&self.endpoints.token_endpoint)?;
        let resp = self.post_form(&url, params, "Get Token").await?;

        if resp.is_success() {
            return TokenResponse::from_wire(&resp.body);
        }

        Ok(match resp.json() {
            Some(serde_json::Value::Object(wire)) if wire.contains_key("error") => {
                TokenResponse::from_error_wire(&wire)
            }
            _ => TokenResponse::failure(
                "http_error",
                Some(format!("token request returned HTTP {}", resp.status)),
            ),
        })
    }

    /// Poll the token endpoint until the user finishes signing in.
    ///
    /// Sleeps `interval` seconds before each attempt and makes at most
    /// `expires_in / interval` attempts. `authorization_pending` keeps
    /// polling, `slow_down` keeps polling at a longer interval, and any other
    /// OAuth error ends the flow with a failed [`TokenResponse`].
    pub async fn get_token_with_polling(
        &self,
        params: &[(&str, &str)],
        interval: u64,
        expires_in: u64,
    ) -> Result<TokenResponse, ClientError> {
        if interval == 0 {
            return Err(ClientError::invalid_argument("interval must be greater than zero"));
        }

        let max_attempts = expires_in / interval;
        let url = versioned_api_url(&self.endpoints.token_endpoint)?;
        let mut interval = interval;

        for attempt in 1..=max_attempts {
            tokio::time::sleep(Duration::from_secs(interval)).await;

            let resp = match self.post_form(&url, params, "Get Token").await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(attempt, error = %e, "token poll failed, retrying");
                    continue;
                }
            };

            match classify_poll_response(&resp)? {
                PollOutcome::Token(token) | PollOutcome::Denied(token) => return Ok(token),
                PollOutcome::Pending => {
                    debug!(attempt, "authorization pending");
                }
                PollOutcome::SlowDown => {
                    interval += SLOW_DOWN_INCREMENT_SECS;
                    debug!(attempt, interval, "server asked to slow down");
                }
                PollOutcome::NoAnswer => {
                    debug!(attempt, status = resp.status, "token poll returned no answer, retrying");
                }
            }
        }

        Err(ClientError::RetryExhausted {
            attempts: max_attempts,
        })
    }

    async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        operation: &str,
    ) -> Result<HttpResponse, ClientError> {
        let req = client_request(HttpRequest::post(url).form(params));
        let resp = self.transport.execute(req).await?;
        if let Some(id) = resp.header("client-request-id") {
            debug!(operation, client_request_id = id, "server returned correlation id");
        }
        Ok(resp)
    }
}

fn classify_poll_response(resp: &HttpResponse) -> Result<PollOutcome, ClientError> {
    if resp.is_success() {
        let wire = parse_object(&resp.body, "token")?;
        if wire.contains_key("error") {
            return Ok(classify_error(&wire));
        }
        return validate_token_response(&resp.body, Utc::now()).map(PollOutcome::Token);
    }

    // Azure AD answers pending polls with 400 and an error body.
    match resp.json() {
        Some(serde_json::Value::Object(wire)) if wire.contains_key("error") => {
            Ok(classify_error(&wire))
        }
        _ => Ok(PollOutcome::NoAnswer),
    }
}

fn classify_error(wire: &serde_json::Map<String, serde_json::Value>) -> PollOutcome {
    match string_field(wire, "error").as_deref() {
        Some("authorization_pending") => PollOutcome::Pending,
        Some("slow_down") => PollOutcome::SlowDown,
        _ => PollOutcome::Denied(TokenResponse::from_error_wire(wire)),
    }
}

fn error_detail(resp: &HttpResponse) -> String {
    resp.json()
        .and_then(|body| {
            body.get("error_description")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .map(|s| format!(": {s}"))
        })
        .unwrap_or_default()
}

/// Set `api-version=1.0` on an endpoint URL, keeping any other query parameters.
pub(crate) fn versioned_api_url(endpoint: &str) -> Result<String, ClientError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ClientError::invalid_authority(format!("bad endpoint '{endpoint}': {e}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "api-version")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("api-version", AAD_API_VERSION);
    Ok(url.to_string())
}
