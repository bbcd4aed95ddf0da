//! Listener configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// TCP and local-IPC listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Host address for the TCP listener
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the TCP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// How many adjacent ports to probe when the configured port is taken
    #[serde(default = "default_port_probe_window")]
    pub port_probe_window: u16,

    /// Whether the local IPC endpoint (unix socket / named pipe) is served
    #[serde(default = "crate::domains::utils::default_true")]
    pub ipc_enabled: bool,

    /// Explicit IPC path override. Defaults to `<data_dir>/mcpproxy.sock`
    /// on POSIX and `\\.\pipe\mcpproxy-<user>` on Windows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_path: Option<String>,

    /// Data directory for the socket, caches, and state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_probe_window: default_port_probe_window(),
            ipc_enabled: true,
            ipc_path: None,
            data_dir: None,
        }
    }
}

impl ListenConfig {
    /// The configured `host:port` pair
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Validatable for ListenConfig {
    fn validate(&self) -> ConfigResult<()> {
        crate::validation::validate_required_string(&self.host, "host", self.domain_name())?;
        crate::validation::validate_port_range(self.port, "port", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "listen"
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_port_probe_window() -> u16 {
    10
}
