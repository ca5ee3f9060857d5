//! Client configuration
//!
//! Values come from serde defaults, then an optional TOML file, then
//! `CRM_`-prefixed environment variables (`CRM_BASE_URL`,
//! `CRM_TIMEOUT_SECS`, ...).

use super::error::ClientError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the session/log directory
pub const STATE_DIR_ENV: &str = "CRM_STATE_DIR";

/// Connection and session settings for [`super::AuthClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the CRM API, e.g. `https://crm.example.com/api`
    pub base_url: String,

    /// Request timeout in seconds (0 = none)
    pub timeout_secs: u64,

    pub user_agent: String,

    /// How often a long-lived session re-checks token expiry
    pub expiry_check_interval_secs: u64,

    /// Directory holding the persisted session
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_secs: 30,
            user_agent: super::transport::DEFAULT_USER_AGENT.to_string(),
            expiry_check_interval_secs: 300,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("CRM").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be expressed by types
    pub fn validate(&self) -> Result<(), ClientError> {
        let scheme = url::Url::parse(&self.base_url).map(|url| url.scheme().to_string());
        if !matches!(scheme.as_deref(), Ok("http" | "https")) {
            return Err(ClientError::Configuration(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    pub const fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }

    /// Configured directory, else `CRM_STATE_DIR`, else the platform data dir
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Default directory for session and log files
pub fn default_data_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV).map_or_else(
        |_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pipeline-crm")
        },
        PathBuf::from,
    )
}
