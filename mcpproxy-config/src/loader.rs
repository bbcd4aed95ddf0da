//! Configuration loading with environment variable overrides

use std::path::{Path, PathBuf};

use crate::domains::ProxyConfig;
use crate::error::ConfigResult;

/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "MCPPROXY_DATA_DIR";

/// Environment variable overriding the REST API key
pub const ENV_API_KEY: &str = "MCPPROXY_API_KEY";

/// Environment variable pointing local clients at a running instance.
/// Empty or unset means standalone mode.
pub const ENV_TRAY_ENDPOINT: &str = "MCPPROXY_TRAY_ENDPOINT";

/// Loads YAML configuration files and applies environment overrides
#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit config file path
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load, apply env overrides, and validate
    pub fn load(&self) -> ConfigResult<ProxyConfig> {
        let mut config = match &self.path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&raw)?
            }
            None => ProxyConfig::default(),
        };

        apply_env_overrides(&mut config);
        config.validate_all()?;
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut ProxyConfig) {
    if let Ok(data_dir) = std::env::var(ENV_DATA_DIR) {
        if !data_dir.is_empty() {
            config.listen.data_dir = Some(data_dir);
        }
    }

    if let Ok(api_key) = std::env::var(ENV_API_KEY) {
        if !api_key.is_empty() {
            config.security.api_key = api_key;
        }
    }
}
