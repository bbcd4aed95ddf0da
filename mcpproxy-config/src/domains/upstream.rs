//! Upstream MCP server configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Transport protocol for an upstream server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Pick stdio for command-based servers, streamable-http/http for URLs
    #[default]
    Auto,
    /// Local subprocess speaking line-delimited JSON-RPC
    Stdio,
    /// Plain HTTP POST per request
    Http,
    /// Server-Sent Events (explicit opt-in only)
    Sse,
    /// Streamable HTTP per the MCP specification
    StreamableHttp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Auto => "auto",
            Protocol::Stdio => "stdio",
            Protocol::Http => "http",
            Protocol::Sse => "sse",
            Protocol::StreamableHttp => "streamable-http",
        }
    }
}

/// OAuth client settings for an upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    /// OAuth client identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Requested scopes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Extra parameters appended to the authorization URL and token body.
    /// Explicitly configured values win over auto-detected ones.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_params: BTreeMap<String, String>,
}

/// One upstream MCP server entry.
///
/// The name is the map key in [`crate::domains::ProxyConfig::mcp_servers`]
/// and is immutable once stored; renaming is remove + add.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Transport protocol
    pub protocol: Protocol,

    /// Command to launch for stdio transports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command arguments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables passed to the subprocess
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Endpoint URL for HTTP-family transports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extra HTTP headers for HTTP-family transports
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Whether the connector loop should keep this server connected
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Quarantined servers are hidden from discovery and blocked from calls
    #[serde(default = "crate::domains::utils::default_false")]
    pub quarantined: bool,

    /// OAuth client settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthClientConfig>,

    /// When the entry was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UpstreamConfig {
    /// Whether this entry describes a subprocess server
    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }

    /// Whether this entry describes a remote HTTP-family server
    pub fn is_url(&self) -> bool {
        self.url.is_some()
    }
}

impl Validatable for UpstreamConfig {
    fn validate(&self) -> ConfigResult<()> {
        match (&self.command, &self.url) {
            (None, None) => {
                return Err(self.validation_error("either command or url must be set"));
            }
            (Some(_), Some(_)) => {
                return Err(self.validation_error("command and url are mutually exclusive"));
            }
            (Some(command), None) => {
                if command.trim().is_empty() {
                    return Err(self.validation_error("command cannot be empty"));
                }
                if matches!(
                    self.protocol,
                    Protocol::Http | Protocol::Sse | Protocol::StreamableHttp
                ) {
                    return Err(self.validation_error(format!(
                        "protocol '{}' requires a url, not a command",
                        self.protocol.as_str()
                    )));
                }
            }
            (None, Some(url)) => {
                crate::validation::validate_url(url, "url", self.domain_name())?;
                if self.protocol == Protocol::Stdio {
                    return Err(
                        self.validation_error("protocol 'stdio' requires a command, not a url")
                    );
                }
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "upstream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config() -> UpstreamConfig {
        UpstreamConfig {
            command: Some("uvx".to_string()),
            args: vec!["some-mcp-server".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_protocol_serde_names() {
        assert_eq!(
            serde_json::to_string(&Protocol::StreamableHttp).unwrap(),
            "\"streamable-http\""
        );
        let parsed: Protocol = serde_json::from_str("\"sse\"").unwrap();
        assert_eq!(parsed, Protocol::Sse);
    }

    #[test]
    fn test_upstream_validation() {
        assert!(stdio_config().validate().is_ok());

        let neither = UpstreamConfig::default();
        assert!(neither.validate().is_err());

        let both = UpstreamConfig {
            command: Some("cmd".to_string()),
            url: Some("https://example.com/mcp".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let stdio_with_url = UpstreamConfig {
            protocol: Protocol::Stdio,
            url: Some("https://example.com/mcp".to_string()),
            ..Default::default()
        };
        assert!(stdio_with_url.validate().is_err());
    }

    #[test]
    fn test_quarantined_defaults_false_in_file() {
        let parsed: UpstreamConfig =
            serde_yaml::from_str("command: npx\nargs: [server]").unwrap();
        assert!(!parsed.quarantined);
        assert!(parsed.enabled);
    }
}
