//! Azure AD authentication
//!
//! [`AuthenticationContext`] ties one [`Authority`] to the OAuth2 flows the CLI
//! needs: client credentials for service principals and the device-code grant
//! for interactive sign-in.

pub mod authority;
pub mod id_token;
pub mod oauth2;
pub mod token;

use std::sync::Arc;

use tracing::debug;

pub use authority::{Authority, OAuthEndpoints};
pub use id_token::IdTokenInfo;
pub use token::{TokenResponse, UserCodeInfo};

use crate::error::ClientError;
use crate::http::{HttpRequest, Transport};
use oauth2::OAuth2Client;

const CLIENT_SKU: &str = "dtl-rs";

/// Add the client identification headers Azure AD expects on auth requests.
pub(crate) fn client_request(request: HttpRequest) -> HttpRequest {
    let request = if request.header_value("Accept-Charset").is_none() {
        request.header("Accept-Charset", "utf-8")
    } else {
        request
    };
    request
        .header("return-client-request-id", "true")
        .header("x-client-SKU", CLIENT_SKU)
        .header("x-client-Ver", env!("CARGO_PKG_VERSION"))
        .header("x-client-OS", std::env::consts::OS)
        .header("x-client-CPU", std::env::consts::ARCH)
}

/// Hook for storing acquired tokens.
pub trait TokenCache: Send + Sync {
    fn add(&self, token: &TokenResponse);
}

/// A cache that keeps nothing.
#[derive(Debug, Default)]
pub struct NoopCache;

impl TokenCache for NoopCache {
    fn add(&self, _token: &TokenResponse) {}
}

pub struct AuthenticationContext {
    transport: Arc<dyn Transport>,
    authority: Authority,
    cache: Box<dyn TokenCache>,
}

impl AuthenticationContext {
    /// Create a context for `authority_url`.
    ///
    /// The URL is parsed here; validation against known hosts happens on the
    /// first token request.
    pub fn new(
        transport: Arc<dyn Transport>,
        authority_url: &str,
        validate_authority: bool,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            transport,
            authority: Authority::resolve(authority_url, validate_authority)?,
            cache: Box::new(NoopCache),
        })
    }

    pub fn with_cache(mut self, cache: Box<dyn TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Acquire a token for a service principal.
    pub async fn acquire_token_with_client_credentials(
        &self,
        resource: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, ClientError> {
        require("resource", resource)?;
        require("client_id", client_id)?;
        require("client_secret", client_secret)?;

        let endpoints = self.authority.validate(self.transport.as_ref()).await?;
        debug!(client_id, resource, "acquiring token with client credentials");

        let token = OAuth2Client::new(self.transport.as_ref(), endpoints)
            .get_token(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("resource", resource),
            ])
            .await?;
        self.remember(&token);
        Ok(token)
    }

    /// Request the code a user enters at the verification URL.
    ///
    /// `language` is passed to Azure AD as the `mkt` market code for the
    /// returned message.
    pub async fn acquire_user_code(
        &self,
        resource: &str,
        client_id: &str,
        language: Option<&str>,
    ) -> Result<UserCodeInfo, ClientError> {
        require("resource", resource)?;
        require("client_id", client_id)?;

        let endpoints = self.authority.validate(self.transport.as_ref()).await?;

        let mut params = vec![("client_id", client_id), ("resource", resource)];
        if let Some(language) = language {
            params.push(("mkt", language));
        }

        OAuth2Client::new(self.transport.as_ref(), endpoints)
            .get_user_code_info(&params)
            .await
    }

    /// Wait for the user to finish the device-code sign-in started by
    /// [`acquire_user_code`](Self::acquire_user_code).
    pub async fn acquire_token_with_device_code(
        &self,
        resource: &str,
        client_id: &str,
        user_code_info: &UserCodeInfo,
    ) -> Result<TokenResponse, ClientError> {
        require("resource", resource)?;
        require("client_id", client_id)?;
        require("device_code", &user_code_info.device_code)?;
        if user_code_info.interval == 0 {
            return Err(ClientError::invalid_argument(
                "interval must be greater than zero",
            ));
        }

        let endpoints = self.authority.validate(self.transport.as_ref()).await?;

        let token = OAuth2Client::new(self.transport.as_ref(), endpoints)
            .get_token_with_polling(
                &[
                    ("grant_type", "device_code"),
                    ("code", user_code_info.device_code.as_str()),
                    ("client_id", client_id),
                    ("resource", resource),
                ],
                user_code_info.interval,
                user_code_info.expires_in,
            )
            .await?;
        self.remember(&token);
        Ok(token)
    }

    fn remember(&self, token: &TokenResponse) {
        if token.is_success() {
            self.cache.add(token);
        }
    }
}

fn require(name: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::invalid_argument(format!(
            "missing required value for {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::http::testing::ScriptedTransport;

    const RESOURCE: &str = "https://management.core.windows.net/";

    fn context(transport: &Arc<ScriptedTransport>, authority: &str) -> AuthenticationContext {
        AuthenticationContext::new(transport.clone(), authority, true).unwrap()
    }

    fn user_code(interval: u64) -> UserCodeInfo {
        UserCodeInfo {
            device_code: "dc".into(),
            user_code: "ABCD".into(),
            verification_url: None,
            interval,
            expires_in: 900,
            message: None,
        }
    }

    #[derive(Default)]
    struct RecordingCache(Mutex<Vec<String>>);

    impl TokenCache for Arc<RecordingCache> {
        fn add(&self, token: &TokenResponse) {
            self.0
                .lock()
                .unwrap()
                .push(token.access_token.clone().unwrap_or_default());
        }
    }

    #[test]
    fn test_invalid_authority_fails_before_network() {
        let transport = Arc::new(ScriptedTransport::new());
        for url in [
            "http://login.windows.net/contoso",
            "https://login.windows.net/contoso?foo=bar",
        ] {
            let err = AuthenticationContext::new(transport.clone(), url, true)
                .err()
                .unwrap();
            assert!(matches!(err, ClientError::InvalidAuthority { .. }), "{url}");
        }
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_client_request_headers() {
        let req = client_request(HttpRequest::post("https://login.windows.net/t/oauth2/token"));
        assert_eq!(req.header_value("Accept-Charset"), Some("utf-8"));
        assert_eq!(req.header_value("x-client-SKU"), Some(CLIENT_SKU));
        assert_eq!(req.header_value("x-client-Ver"), Some(env!("CARGO_PKG_VERSION")));
        assert!(req.header_value("x-client-OS").is_some());
        assert!(req.header_value("x-client-CPU").is_some());
    }

    #[tokio::test]
    async fn test_client_credentials_non_2xx_returns_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(400, json!({"error": "unauthorized_client"}));
        let cache = Arc::new(RecordingCache::default());
        let ctx = context(&transport, "https://login.windows.net/contoso")
            .with_cache(Box::new(cache.clone()));

        let token = ctx
            .acquire_token_with_client_credentials(RESOURCE, "cid", "secret")
            .await
            .unwrap();

        assert!(!token.is_success());
        assert!(token.access_token.is_none());
        assert!(cache.0.lock().unwrap().is_empty());
        // Known host: only the token request went out.
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_credentials_success_is_cached() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!({"token_type": "Bearer", "access_token": "at"}));
        let cache = Arc::new(RecordingCache::default());
        let ctx = context(&transport, "https://login.windows.net/contoso")
            .with_cache(Box::new(cache.clone()));

        let token = ctx
            .acquire_token_with_client_credentials(RESOURCE, "cid", "secret")
            .await
            .unwrap();

        assert!(token.is_success());
        assert_eq!(*cache.0.lock().unwrap(), vec!["at".to_string()]);
        let body = transport.requests()[0].body.clone().unwrap();
        assert!(body.contains("client_secret=secret"));
    }

    #[tokio::test]
    async fn test_client_credentials_requires_secret() {
        let transport = Arc::new(ScriptedTransport::new());
        let ctx = context(&transport, "https://login.windows.net/contoso");

        let err = ctx
            .acquire_token_with_client_credentials(RESOURCE, "cid", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_authority_is_discovered_before_token_request() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            200,
            json!({"tenant_discovery_endpoint": "https://login.example.com/t/.well-known/openid-configuration"}),
        );
        transport.push_json(200, json!({"token_type": "Bearer", "access_token": "at"}));
        let ctx = context(&transport, "https://login.example.com/t");

        ctx.acquire_token_with_client_credentials(RESOURCE, "cid", "secret")
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, reqwest::Method::GET);
        assert!(requests[1].url.starts_with("https://login.example.com/t/oauth2/token"));
    }

    #[tokio::test]
    async fn test_acquire_user_code_sends_language() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            200,
            json!({"device_code": "dc", "user_code": "uc", "expires_in": 900, "interval": 5}),
        );
        let ctx = context(&transport, "https://login.windows.net/contoso");

        let info = ctx
            .acquire_user_code(RESOURCE, "cid", Some("en-us"))
            .await
            .unwrap();
        assert_eq!(info.user_code, "uc");

        let req = &transport.requests()[0];
        assert_eq!(
            req.url,
            "https://login.windows.net/contoso/oauth2/devicecode?api-version=1.0"
        );
        assert!(req.body.as_deref().unwrap().ends_with("&mkt=en-us"));
    }

    #[tokio::test]
    async fn test_device_code_rejects_bad_user_code_info() {
        let transport = Arc::new(ScriptedTransport::new());
        let ctx = context(&transport, "https://login.windows.net/contoso");

        let err = ctx
            .acquire_token_with_device_code(RESOURCE, "cid", &user_code(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));

        let mut info = user_code(5);
        info.device_code.clear();
        let err = ctx
            .acquire_token_with_device_code(RESOURCE, "cid", &info)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_code_flow() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(400, json!({"error": "authorization_pending"}));
        transport.push_json(
            200,
            json!({"token_type": "Bearer", "access_token": "at", "expires_in": 3600}),
        );
        let ctx = context(&transport, "https://login.windows.net/contoso");

        let token = ctx
            .acquire_token_with_device_code(RESOURCE, "cid", &user_code(5))
            .await
            .unwrap();
        assert_eq!(token.access_token.as_deref(), Some("at"));
        assert_eq!(transport.requests().len(), 2);
    }
}
