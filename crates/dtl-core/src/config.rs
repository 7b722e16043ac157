//! Configuration file handling for dtl
//!
//! Config is stored at `~/.config/dtl/config.yaml` (or the platform equivalent
//! via `dirs::config_dir()`). Every field is optional; command-line flags take
//! precedence over values read from the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Config filename within the dtl config directory
const FILENAME: &str = "config.yaml";

/// Application directory name
const APP_DIR: &str = "dtl";

/// Default identity provider host used to build the authority URL
pub const DEFAULT_AUTHORITY_HOST: &str = "login.windows.net";

/// Default resource the access token is requested for
pub const DEFAULT_RESOURCE: &str = "https://management.core.windows.net/";

/// Default seconds between deployment status polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config not found at {0}")]
    NotFound(PathBuf),

    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Top-level dtl configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Azure application (client) ID
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret; when absent the device-code flow is used
    #[serde(default)]
    pub secret: Option<String>,

    /// Azure AD tenant ID or domain
    #[serde(default)]
    pub tenant: Option<String>,

    /// Azure subscription ID
    #[serde(default)]
    pub subscription: Option<String>,

    /// Identity provider host, e.g. `login.windows.net`
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Check the authority against known hosts or instance discovery
    #[serde(default = "default_true")]
    pub validate_authority: bool,

    /// Resource the access token is requested for
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Seconds between deployment status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single deployment wait; unbounded when absent
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,

    /// Directory holding the ARM templates used by `newvm` and `newvmtemplate`
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_resource() -> String {
    DEFAULT_RESOURCE.to_string()
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            secret: None,
            tenant: None,
            subscription: None,
            authority_host: default_authority_host(),
            validate_authority: true,
            resource: default_resource(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: None,
            templates_dir: None,
        }
    }
}

/// Values supplied on the command line that override the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub tenant: Option<String>,
    pub subscription: Option<String>,
}

impl Config {
    /// Return the path to the config file: `<config_dir>/dtl/config.yaml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join(FILENAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load the config from the standard location.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        Self::load_from(&path)
    }

    /// Load the config from the standard location, falling back to defaults
    /// when no file exists.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load() {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read(e)
            }
        })?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the file values.
    pub fn merge(mut self, overrides: Overrides) -> Self {
        if overrides.client_id.is_some() {
            self.client_id = overrides.client_id;
        }
        if overrides.secret.is_some() {
            self.secret = overrides.secret;
        }
        if overrides.tenant.is_some() {
            self.tenant = overrides.tenant;
        }
        if overrides.subscription.is_some() {
            self.subscription = overrides.subscription;
        }
        self
    }

    /// Authority URL for the configured tenant, e.g.
    /// `https://login.windows.net/<tenant>`.
    pub fn authority_url(&self) -> Option<String> {
        self.tenant
            .as_deref()
            .map(|tenant| format!("https://{}/{}", self.authority_host, tenant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_under_config_dir() {
        let path = Config::path().unwrap();
        assert!(path.ends_with("dtl/config.yaml"));
    }

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let parsed: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(parsed.authority_host, "login.windows.net");
        assert!(parsed.validate_authority);
        assert_eq!(parsed.resource, DEFAULT_RESOURCE);
        assert_eq!(parsed.poll_interval_secs, 60);
        assert!(parsed.poll_timeout_secs.is_none());
        assert!(parsed.client_id.is_none());
    }

    #[test]
    fn test_config_partial_yaml() {
        let yaml = r#"
client_id: app-123
tenant: contoso.onmicrosoft.com
subscription: 00000000-0000-0000-0000-000000000001
poll_interval_secs: 15
"#;
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.client_id.as_deref(), Some("app-123"));
        assert_eq!(parsed.poll_interval_secs, 15);
        assert!(parsed.secret.is_none());
        assert_eq!(
            parsed.authority_url().as_deref(),
            Some("https://login.windows.net/contoso.onmicrosoft.com")
        );
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let config = Config {
            client_id: Some("file-client".into()),
            tenant: Some("file-tenant".into()),
            ..Config::default()
        };
        let merged = config.merge(Overrides {
            client_id: Some("cli-client".into()),
            subscription: Some("cli-sub".into()),
            ..Overrides::default()
        });
        assert_eq!(merged.client_id.as_deref(), Some("cli-client"));
        assert_eq!(merged.tenant.as_deref(), Some("file-tenant"));
        assert_eq!(merged.subscription.as_deref(), Some("cli-sub"));
        assert!(merged.secret.is_none());
    }

    #[test]
    fn test_authority_url_requires_tenant() {
        assert!(Config::default().authority_url().is_none());
    }

    #[test]
    fn test_config_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "client_id: app\npoll_timeout_secs: 1800\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("app"));
        assert_eq!(loaded.poll_timeout_secs, Some(1800));
        assert!(loaded.secret.is_none());
        assert_eq!(loaded.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_config_load_rejects_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "poll_interval_secs: [not, a, number]\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_config_load_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.yaml");
        let result = Config::load_from(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
