//! CLI configuration utilities

use anyhow::{Context, Result};
use crm_http::ClientConfig;
use std::path::{Path, PathBuf};

/// Values given on the command line, applied over file and environment
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

/// Load client configuration, then apply command-line overrides
pub fn load_client_config(path: Option<&Path>, overrides: Overrides) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    if let Some(base_url) = overrides.base_url {
        config.base_url = base_url;
    }
    if let Some(timeout_secs) = overrides.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = Some(data_dir);
    }

    config.validate()?;
    Ok(config)
}
