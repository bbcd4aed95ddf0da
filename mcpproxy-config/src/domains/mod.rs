//! Domain-specific configuration modules

pub mod listen;
pub mod logging;
pub mod sandbox;
pub mod security;
pub mod truncation;
pub mod upstream;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Root proxy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration
    pub listen: listen::ListenConfig,

    /// Management and quarantine policy
    pub security: security::SecurityConfig,

    /// Configured upstream MCP servers, keyed by unique name
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, upstream::UpstreamConfig>,

    /// JavaScript sandbox limits
    pub sandbox: sandbox::SandboxConfig,

    /// Response truncation and cache settings
    pub truncation: truncation::TruncationConfig,

    /// Logging configuration
    pub logging: logging::LoggingConfig,
}

impl ProxyConfig {
    /// Validate every domain
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.listen.validate()?;
        self.security.validate()?;
        self.sandbox.validate()?;
        self.truncation.validate()?;
        self.logging.validate()?;

        for (name, upstream) in &self.mcp_servers {
            crate::validation::validate_required_string(name, "server name", "upstream")?;
            upstream.validate()?;
        }

        Ok(())
    }
}
