//! Shared helpers for CLI commands
//!
//! Everything a command needs from the environment lives in [`Context`]:
//! merged configuration, the HTTP transport, the Ctrl-C cancellation token and
//! the console printer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use dtl_client::auth::AuthenticationContext;
use dtl_client::http::{ReqwestTransport, Transport};
use dtl_client::lab::LabClient;
use dtl_client::poll::PollPolicy;
use dtl_core::config::Config;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::output::Printer;

/// File name of the ARM template inside each quickstart directory.
const TEMPLATE_FILE: &str = "azuredeploy.json";

/// Quickstart template used to capture a VM as a VM template.
pub const VM_TEMPLATE_VARIANT: &str = "201-dtl-create-vmtemplate";

pub struct Context {
    pub config: Config,
    pub printer: Printer,
    pub transport: Arc<dyn Transport>,
    pub cancel: CancellationToken,
    device_code: bool,
}

impl Context {
    pub fn new(
        config: Config,
        printer: Printer,
        device_code: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            printer,
            transport: Arc::new(ReqwestTransport::new()),
            cancel,
            device_code,
        }
    }

    fn subscription(&self) -> Result<&str> {
        self.config.subscription.as_deref().context(
            "No subscription configured. Pass --subscription or set DTL_SUBSCRIPTION.",
        )
    }

    /// Poll settings from the config file.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::fixed(Duration::from_secs(self.config.poll_interval_secs.max(1)))
            .with_timeout(self.config.poll_timeout_secs.map(Duration::from_secs))
    }

    /// Sign in and return an ARM access token.
    pub async fn access_token(&self) -> Result<String> {
        let authority = self
            .config
            .authority_url()
            .context("No tenant configured. Pass --tenant or set DTL_TENANT.")?;
        let client_id = self
            .config
            .client_id
            .as_deref()
            .context("No client ID configured. Pass --client-id or set DTL_CLIENT_ID.")?;
        let resource = self.config.resource.as_str();

        let auth = AuthenticationContext::new(
            self.transport.clone(),
            &authority,
            self.config.validate_authority,
        )?;

        // Without a secret the only option is an interactive sign-in.
        let token = match self.config.secret.as_deref().filter(|_| !self.device_code) {
            Some(secret) => {
                auth.acquire_token_with_client_credentials(resource, client_id, secret)
                    .await?
            }
            None => {
                let info = auth.acquire_user_code(resource, client_id, None).await?;
                match &info.message {
                    Some(message) => self.printer.info(message),
                    None => self.printer.info(&format!(
                        "To sign in, open {} and enter the code {}",
                        info.verification_url.as_deref().unwrap_or("the verification page"),
                        info.user_code
                    )),
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => bail!("Sign-in cancelled."),
                    token = auth.acquire_token_with_device_code(resource, client_id, &info) => token?,
                }
            }
        };

        if !token.is_success() {
            bail!(
                "Authentication failed: {}",
                describe_failure(
                    token.error.as_deref(),
                    token.error_description.as_deref()
                )
            );
        }
        debug!(expires_on = ?token.expires_on, "acquired access token");
        token
            .access_token
            .context("Authentication succeeded without an access token.")
    }

    /// Sign in and build a client for the configured subscription.
    pub async fn lab_client(&self) -> Result<LabClient> {
        let subscription = self.subscription()?.to_string();
        let token = self.access_token().await?;
        Ok(
            LabClient::new(self.transport.clone(), token, subscription)
                .with_policy(self.poll_policy()),
        )
    }

    /// The ARM template to deploy: `explicit` when given, otherwise
    /// `<templates_dir>/<variant>/azuredeploy.json`.
    pub fn template_path(&self, explicit: Option<PathBuf>, variant: &str) -> PathBuf {
        explicit.unwrap_or_else(|| {
            let dir = self
                .config
                .templates_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("templates"));
            quickstart_template(&dir, variant)
        })
    }
}

fn quickstart_template(templates_dir: &Path, variant: &str) -> PathBuf {
    templates_dir.join(variant).join(TEMPLATE_FILE)
}

/// Read and parse an ARM template file.
pub fn load_template(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ARM template {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("ARM template {} is not valid JSON", path.display()))
}

fn describe_failure(error: Option<&str>, description: Option<&str>) -> String {
    match (error, description) {
        (Some(error), Some(description)) => format!("{error}: {description}"),
        (Some(error), None) => error.to_string(),
        (None, Some(description)) => description.to_string(),
        (None, None) => "no access token returned".to_string(),
    }
}
