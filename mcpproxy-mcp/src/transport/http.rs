//! HTTP and streamable-HTTP transports for remote MCP servers

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;

use super::UpstreamTransport;
use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Maximum characters of an error body carried into error values
const BODY_EXCERPT_LEN: usize = 200;

/// Session header defined by the streamable HTTP transport
const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP transport: one POST per JSON-RPC request.
///
/// With `streamable` set, requests advertise `text/event-stream` support and
/// the transport understands SSE-framed responses plus the `Mcp-Session-Id`
/// session header, per the MCP streamable HTTP specification.
pub struct HttpTransport {
    /// Endpoint URL
    url: String,

    /// Extra request headers
    headers: BTreeMap<String, String>,

    /// Whether to speak the streamable HTTP flavor
    streamable: bool,

    /// HTTP client
    client: Client,

    /// Session ID assigned by the server, echoed on subsequent requests
    session_id: Option<String>,

    /// Whether the transport is connected
    connected: bool,
}

impl HttpTransport {
    pub fn new(url: String, headers: BTreeMap<String, String>, streamable: bool) -> McpResult<Self> {
        let parsed = url::Url::parse(&url).map_err(|e| McpError::Configuration {
            message: format!("Invalid URL: {}", e),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(McpError::Configuration {
                    message: format!(
                        "Unsupported URL scheme: {}. Only http and https are allowed.",
                        scheme
                    ),
                });
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| McpError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            url,
            headers,
            streamable,
            client,
            session_id: None,
            connected: false,
        })
    }

    fn accept_value(&self) -> &'static str {
        if self.streamable {
            "application/json, text/event-stream"
        } else {
            "application/json"
        }
    }

    async fn post(&mut self, body: &JsonRpcRequest) -> McpResult<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, self.accept_value());

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.url, e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        Ok(response)
    }

    async fn check_status(&self, response: reqwest::Response) -> McpResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() || status == StatusCode::ACCEPTED {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            let resource_metadata = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_resource_metadata);
            return Err(McpError::AuthRequired { resource_metadata });
        }

        let body = response.text().await.unwrap_or_default();
        Err(McpError::Transport {
            message: format!("HTTP request failed with status {}", status),
            http_status: Some(status.as_u16()),
            body_excerpt: Some(excerpt(&body)),
            url: Some(self.url.clone()),
        })
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn connect(&mut self) -> McpResult<()> {
        // No connection setup; the initialize handshake is the real probe.
        self.connected = true;
        Ok(())
    }

    async fn request(&mut self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }

        let want_id = request.id.clone();
        let response = self.post(&request).await?;
        let response = self.check_status(response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| McpError::transport(format!("Failed to read response body: {}", e)))?;

        if content_type.starts_with("text/event-stream") {
            parse_sse_response(&body, &want_id).ok_or_else(|| {
                McpError::transport("Event stream ended without a matching response")
            })
        } else {
            serde_json::from_str(&body).map_err(|e| McpError::Serialization {
                message: format!("Failed to parse response: {}", e),
            })
        }
    }

    async fn notify(&mut self, notification: JsonRpcRequest) -> McpResult<()> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }

        let response = self.post(&notification).await?;
        self.check_status(response).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> McpResult<()> {
        self.connected = false;
        self.session_id = None;
        Ok(())
    }
}

/// Extract `resource_metadata="<url>"` from a `WWW-Authenticate` header
/// (RFC 9728 §5.1). Accepts quoted and bare forms.
pub fn parse_resource_metadata(header: &str) -> Option<String> {
    let start = header.find("resource_metadata=")? + "resource_metadata=".len();
    let rest = &header[start..];

    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        Some(stripped[..end].to_string())
    } else {
        let end = rest
            .find(|c: char| c == ',' || c.is_whitespace())
            .unwrap_or(rest.len());
        let value = rest[..end].trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// Pull the response with the wanted id out of an SSE body
fn parse_sse_response(body: &str, want_id: &Option<serde_json::Value>) -> Option<JsonRpcResponse> {
    for line in body.lines() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
                if &response.id == want_id {
                    return Some(response);
                }
            }
        }
    }
    None
}

fn classify_reqwest_error(url: &str, err: reqwest::Error) -> McpError {
    if err.is_timeout() {
        McpError::Timeout {
            seconds: crate::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    } else if err.is_connect() {
        McpError::ConnectionFailed {
            message: format!("Failed to connect to {}: {}", url, err),
        }
    } else {
        McpError::Transport {
            message: err.to_string(),
            http_status: err.status().map(|s| s.as_u16()),
            body_excerpt: None,
            url: Some(url.to_string()),
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LEN).collect()
}
