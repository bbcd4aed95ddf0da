//! Management and quarantine policy

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Security predicates consulted by the `upstream_servers` virtual tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Only `list` is allowed through the management tool
    #[serde(default = "crate::domains::utils::default_false")]
    pub read_only_mode: bool,

    /// Disable the management tool entirely
    #[serde(default = "crate::domains::utils::default_false")]
    pub disable_management: bool,

    /// Allow `add` through the management tool
    #[serde(default = "crate::domains::utils::default_true")]
    pub allow_server_add: bool,

    /// Allow `remove` through the management tool
    #[serde(default = "crate::domains::utils::default_true")]
    pub allow_server_remove: bool,

    /// API key required on remote REST requests. Empty disables the check.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            read_only_mode: false,
            disable_management: false,
            allow_server_add: true,
            allow_server_remove: true,
            api_key: String::new(),
        }
    }
}

impl Validatable for SecurityConfig {
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "security"
    }
}
