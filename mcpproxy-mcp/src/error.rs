//! Error types for upstream MCP operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for upstream MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Upstream MCP error types
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum McpError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Connection establishment failed
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The client is not in the Ready state
    #[error("Upstream not connected (state: {state})")]
    NotConnected { state: String },

    /// Transport-level errors, enriched with HTTP context when available
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body_excerpt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// JSON-RPC error returned by the upstream, surfaced verbatim
    #[error("Upstream protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The upstream demands OAuth; carries the RFC 9728 metadata URL when
    /// the 401 response advertised one
    #[error("Upstream requires authorization")]
    AuthRequired {
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_metadata: Option<String>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Request deadline exceeded
    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl McpError {
    /// Shorthand for a plain transport error without HTTP context
    pub fn transport(message: impl Into<String>) -> Self {
        McpError::Transport {
            message: message.into(),
            http_status: None,
            body_excerpt: None,
            url: None,
        }
    }

    /// A troubleshooting hint derived from the error class, surfaced to the
    /// LLM in tool-call error envelopes
    pub fn troubleshooting_hint(&self) -> &'static str {
        match self {
            McpError::AuthRequired { .. } => {
                "The server requires authorization. Check OAuth credentials or complete the pending login."
            }
            McpError::Transport {
                http_status: Some(status),
                ..
            } => match status {
                401 | 403 => "Check the configured credentials or API key for this server.",
                404 => "The endpoint was not found. Verify the server URL path.",
                429 => "The server is rate limiting requests. Retry after a pause.",
                500..=599 => "The upstream server is unavailable or failing. Retry later.",
                _ => "Inspect the HTTP status and response body for details.",
            },
            McpError::Timeout { .. } => {
                "The request timed out. The server may be slow or unreachable."
            }
            McpError::ConnectionFailed { .. } | McpError::Transport { .. } => {
                "Could not reach the server. Verify it is running and the address is correct."
            }
            McpError::NotConnected { .. } => {
                "The server is not connected. Wait for the reconnector or check its configuration."
            }
            _ => "Inspect the error message and the server logs.",
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_by_status() {
        let err = McpError::Transport {
            message: "server error".to_string(),
            http_status: Some(503),
            body_excerpt: None,
            url: None,
        };
        assert!(err.troubleshooting_hint().contains("unavailable"));

        let err = McpError::Transport {
            message: "unauthorized".to_string(),
            http_status: Some(401),
            body_excerpt: None,
            url: None,
        };
        assert!(err.troubleshooting_hint().contains("credentials"));
    }

    #[test]
    fn test_not_connected_carries_state() {
        let err = McpError::NotConnected {
            state: "connecting".to_string(),
        };
        assert!(err.to_string().contains("connecting"));
    }
}
