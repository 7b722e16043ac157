//! Authority resolution and validation
//!
//! An authority is the tenant-specific OAuth2 issuer base URL, e.g.
//! `https://login.windows.net/contoso.onmicrosoft.com`. Validation checks the
//! host against a list of well-known Azure AD hosts and falls back to the
//! instance discovery endpoint for anything else.

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::client_request;
use crate::error::ClientError;
use crate::http::{HttpRequest, Transport};

/// Hosts accepted without a discovery round trip.
pub const WELL_KNOWN_AUTHORITY_HOSTS: &[&str] = &[
    "login.windows.net",
    "login.microsoftonline.com",
    "login.chinacloudapi.cn",
    "login.cloudgovapi.us",
];

/// Host serving the instance discovery endpoint.
const WORLD_WIDE_AUTHORITY: &str = "login.windows.net";

const AUTHORIZE_ENDPOINT_PATH: &str = "/oauth2/authorize";
const TOKEN_ENDPOINT_PATH: &str = "/oauth2/token";
const DEVICE_CODE_ENDPOINT_PATH: &str = "/oauth2/devicecode";

/// Endpoints derived from a validated authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub token_endpoint: String,
    pub device_code_endpoint: String,
}

/// A parsed authority. Endpoints are computed on first successful validation
/// and cached for the lifetime of the value.
#[derive(Debug)]
pub struct Authority {
    url: String,
    host: String,
    tenant: String,
    validate_authority: bool,
    endpoints: OnceCell<OAuthEndpoints>,
}

impl Authority {
    /// Parse and normalize an authority URL.
    ///
    /// Fails with [`ClientError::InvalidAuthority`] when the URL is not HTTPS,
    /// carries a query string, or has no tenant path segment. No network call
    /// is made here.
    pub fn resolve(authority_url: &str, validate_authority: bool) -> Result<Self, ClientError> {
        let parsed = Url::parse(authority_url).map_err(|e| {
            ClientError::invalid_authority(format!("'{authority_url}' is not a valid URL: {e}"))
        })?;

        if parsed.scheme() != "https" {
            return Err(ClientError::invalid_authority(
                "the authority url must be an HTTPS end-point",
            ));
        }

        if parsed.query().is_some_and(|q| !q.is_empty()) {
            return Err(ClientError::invalid_authority(
                "the authority url must not contain a query string",
            ));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ClientError::invalid_authority("the authority url has no host"))?
            .to_ascii_lowercase();

        let tenant = parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .ok_or_else(|| ClientError::invalid_authority("could not determine tenant"))?
            .to_string();

        let url = match parsed.port() {
            Some(port) => format!("https://{host}:{port}/{tenant}"),
            None => format!("https://{host}/{tenant}"),
        };

        Ok(Self {
            url,
            host,
            tenant,
            validate_authority,
            endpoints: OnceCell::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether the authority is usable without further discovery.
    pub fn is_validated(&self) -> bool {
        !self.validate_authority || self.endpoints.initialized()
    }

    /// Validate the authority and return its OAuth endpoints.
    ///
    /// Subsequent calls after a success return the cached endpoints without
    /// touching the network.
    pub async fn validate(&self, transport: &dyn Transport) -> Result<&OAuthEndpoints, ClientError> {
        self.endpoints
            .get_or_try_init(|| async {
                if !self.validate_authority {
                    debug!(authority = %self.url, "authority validation is turned off");
                } else if self.is_well_known_host() {
                    debug!(authority = %self.url, "authority validated via static instance discovery");
                } else {
                    let tenant_discovery = self.discover_instance(transport).await?;
                    debug!(
                        authority = %self.url,
                        tenant_discovery_endpoint = %tenant_discovery,
                        "authority validated via dynamic instance discovery"
                    );
                }
                Ok(OAuthEndpoints {
                    token_endpoint: format!("{}{TOKEN_ENDPOINT_PATH}", self.url),
                    device_code_endpoint: format!("{}{DEVICE_CODE_ENDPOINT_PATH}", self.url),
                })
            })
            .await
    }

    fn is_well_known_host(&self) -> bool {
        WELL_KNOWN_AUTHORITY_HOSTS.contains(&self.host.as_str())
    }

    /// The discovery URL asking whether this authority's authorize endpoint is trusted.
    pub fn instance_discovery_url(&self) -> String {
        let authorize_endpoint = format!(
            "https://{}/{}{AUTHORIZE_ENDPOINT_PATH}",
            self.host, self.tenant
        );
        format!(
            "https://{WORLD_WIDE_AUTHORITY}/common/discovery/instance?authorization_endpoint={}&api-version=1.0",
            urlencoding::encode(&authorize_endpoint)
        )
    }

    async fn discover_instance(&self, transport: &dyn Transport) -> Result<String, ClientError> {
        let url = self.instance_discovery_url();
        debug!(%url, "performing dynamic instance discovery");

        let resp = transport
            .execute(client_request(HttpRequest::get(url)))
            .await
            .map_err(|e| {
                ClientError::authority_validation(format!("instance discovery request failed: {e}"))
            })?;

        if !resp.is_success() {
            return Err(ClientError::authority_validation(format!(
                "instance discovery returned HTTP {} for {}",
                resp.status, self.url
            )));
        }

        let body = resp.json().ok_or_else(|| {
            ClientError::authority_validation("failed to parse instance discovery response")
        })?;

        body.get("tenant_discovery_endpoint")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::authority_validation(format!(
                    "{} is not a recognized authority",
                    self.url
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::testing::ScriptedTransport;

    #[test]
    fn test_rejects_non_https() {
        let err = Authority::resolve("http://login.windows.net/contoso", true).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAuthority { .. }));
    }

    #[test]
    fn test_rejects_query_string() {
        let err = Authority::resolve("https://login.windows.net/contoso?x=1", true).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAuthority { .. }));
    }

    #[test]
    fn test_rejects_missing_tenant() {
        for url in ["https://login.windows.net", "https://login.windows.net/"] {
            let err = Authority::resolve(url, false).unwrap_err();
            assert!(matches!(err, ClientError::InvalidAuthority { .. }), "{url}");
        }
    }

    #[test]
    fn test_parses_host_and_tenant() {
        let authority =
            Authority::resolve("https://Login.Windows.net//contoso.onmicrosoft.com/extra/", true)
                .unwrap();
        assert_eq!(authority.host(), "login.windows.net");
        assert_eq!(authority.tenant(), "contoso.onmicrosoft.com");
        assert_eq!(
            authority.url(),
            "https://login.windows.net/contoso.onmicrosoft.com"
        );
        assert!(!authority.is_validated());
    }

    #[test]
    fn test_instance_discovery_url() {
        let authority = Authority::resolve("https://login.example.com/tenant1", true).unwrap();
        assert_eq!(
            authority.instance_discovery_url(),
            "https://login.windows.net/common/discovery/instance?authorization_endpoint=https%3A%2F%2Flogin.example.com%2Ftenant1%2Foauth2%2Fauthorize&api-version=1.0"
        );
    }

    #[tokio::test]
    async fn test_validation_off_builds_endpoints_without_network() {
        let transport = ScriptedTransport::new();
        let authority = Authority::resolve("https://login.example.com/tenant1", false).unwrap();
        assert!(authority.is_validated());

        let endpoints = authority.validate(&transport).await.unwrap();
        assert_eq!(
            endpoints.token_endpoint,
            "https://login.example.com/tenant1/oauth2/token"
        );
        assert_eq!(
            endpoints.device_code_endpoint,
            "https://login.example.com/tenant1/oauth2/devicecode"
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_known_host_uses_static_discovery() {
        let transport = ScriptedTransport::new();
        let authority = Authority::resolve("https://login.windows.net/contoso", true).unwrap();

        authority.validate(&transport).await.unwrap();
        assert!(authority.is_validated());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_host_uses_dynamic_discovery_once() {
        let transport = ScriptedTransport::new();
        transport.push_json(
            200,
            json!({"tenant_discovery_endpoint": "https://login.example.com/tenant1/.well-known/openid-configuration"}),
        );
        let authority = Authority::resolve("https://login.example.com/tenant1", true).unwrap();

        authority.validate(&transport).await.unwrap();
        authority.validate(&transport).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, reqwest::Method::GET);
        assert_eq!(requests[0].url, authority.instance_discovery_url());
    }

    #[tokio::test]
    async fn test_dynamic_discovery_without_tenant_endpoint_fails() {
        let transport = ScriptedTransport::new();
        transport.push_json(200, json!({"error": "invalid_instance"}));
        let authority = Authority::resolve("https://login.example.com/tenant1", true).unwrap();

        let err = authority.validate(&transport).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorityValidation { .. }));
        assert_eq!(transport.requests().len(), 1);
        assert!(!authority.is_validated());
    }

    #[tokio::test]
    async fn test_dynamic_discovery_unparsable_body_fails() {
        let transport = ScriptedTransport::new();
        transport.push(crate::http::HttpResponse::new(200, "not json"));
        let authority = Authority::resolve("https://login.example.com/tenant1", true).unwrap();

        let err = authority.validate(&transport).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorityValidation { .. }));
    }

    #[tokio::test]
    async fn test_dynamic_discovery_http_error_fails() {
        let transport = ScriptedTransport::new();
        transport.push_json(400, json!({"error": "invalid_instance"}));
        let authority = Authority::resolve("https://login.example.com/tenant1", true).unwrap();

        let err = authority.validate(&transport).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorityValidation { .. }));
    }
}
