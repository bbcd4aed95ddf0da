//! Server-Sent Events transport for remote MCP servers
//!
//! Legacy HTTP+SSE flavor: a GET stream delivers an `endpoint` event naming
//! the POST URL, then responses to posted requests arrive as `message`
//! events on the stream.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::http::parse_resource_metadata;
use super::UpstreamTransport;
use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// One parsed SSE event
#[derive(Debug)]
struct SseEvent {
    name: String,
    data: String,
}

pub struct SseTransport {
    /// Stream URL
    url: String,

    /// Extra request headers
    headers: BTreeMap<String, String>,

    /// HTTP client
    client: Client,

    /// POST endpoint announced by the server
    endpoint: Option<String>,

    /// Incoming events from the reader task
    events: Option<mpsc::Receiver<SseEvent>>,

    /// Whether the transport is connected
    connected: bool,
}

impl SseTransport {
    pub fn new(url: String, headers: BTreeMap<String, String>) -> McpResult<Self> {
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
            .build()
            .map_err(|e| McpError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            url,
            headers,
            client,
            endpoint: None,
            events: None,
            connected: false,
        })
    }

    async fn open_stream(&mut self) -> McpResult<()> {
        let mut builder = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::ConnectionFailed {
                message: format!("Failed to connect to SSE endpoint: {}", e),
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let resource_metadata = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_resource_metadata);
            return Err(McpError::AuthRequired { resource_metadata });
        }

        if !response.status().is_success() {
            return Err(McpError::ConnectionFailed {
                message: format!("SSE connection failed with status: {}", response.status()),
            });
        }

        let (tx, rx) = mpsc::channel(100);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(chunk_result) = stream.next().await {
                let Ok(chunk) = chunk_result else { break };
                let Ok(text) = String::from_utf8(chunk.to_vec()) else {
                    continue;
                };
                buffer.push_str(&text);

                // Events are double-newline separated
                while let Some(event_end) = buffer.find("\n\n") {
                    let event_text = buffer[..event_end].to_string();
                    buffer = buffer[event_end + 2..].to_string();

                    let mut name = "message".to_string();
                    let mut data = String::new();
                    for line in event_text.lines() {
                        let line = line.trim_end();
                        if let Some(value) = line.strip_prefix("event:") {
                            name = value.trim().to_string();
                        } else if let Some(value) = line.strip_prefix("data:") {
                            if !data.is_empty() {
                                data.push('\n');
                            }
                            data.push_str(value.trim());
                        }
                    }

                    if data.is_empty() {
                        continue;
                    }
                    if tx.send(SseEvent { name, data }).await.is_err() {
                        return; // Receiver dropped
                    }
                }
            }
        });

        self.events = Some(rx);
        Ok(())
    }

    async fn next_event(&mut self, timeout: Duration) -> McpResult<SseEvent> {
        let events = self
            .events
            .as_mut()
            .ok_or_else(|| McpError::transport("Transport not connected"))?;

        match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => {
                self.connected = false;
                Err(McpError::ConnectionFailed {
                    message: "SSE stream closed".to_string(),
                })
            }
            Err(_) => Err(McpError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn post(&self, body: &JsonRpcRequest) -> McpResult<()> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| McpError::transport("No POST endpoint announced"))?;

        let mut builder = self
            .client
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json");
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| McpError::transport(format!("POST failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let resource_metadata = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_resource_metadata);
            return Err(McpError::AuthRequired { resource_metadata });
        }
        if !status.is_success() && status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport {
                message: format!("POST failed with status {}", status),
                http_status: Some(status.as_u16()),
                body_excerpt: Some(body.chars().take(200).collect()),
                url: Some(endpoint.clone()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl UpstreamTransport for SseTransport {
    async fn connect(&mut self) -> McpResult<()> {
        if self.connected {
            return Ok(());
        }

        self.open_stream().await?;

        // The server must announce its POST endpoint first
        let event = self.next_event(Duration::from_secs(10)).await?;
        if event.name != "endpoint" {
            return Err(McpError::transport(format!(
                "Expected endpoint event, got '{}'",
                event.name
            )));
        }

        let base = url::Url::parse(&self.url).map_err(|e| McpError::Configuration {
            message: format!("Invalid URL: {}", e),
        })?;
        let endpoint = base.join(&event.data).map_err(|e| {
            McpError::transport(format!("Invalid endpoint '{}': {}", event.data, e))
        })?;

        self.endpoint = Some(endpoint.to_string());
        self.connected = true;
        Ok(())
    }

    async fn request(&mut self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }

        let want_id = request.id.clone();
        self.post(&request).await?;

        let deadline = Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS);
        loop {
            let event = self.next_event(deadline).await?;
            if event.name != "message" {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                Ok(response) if response.id == want_id => return Ok(response),
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!("skipping non-response SSE event");
                }
            }
        }
    }

    async fn notify(&mut self, notification: JsonRpcRequest) -> McpResult<()> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }
        self.post(&notification).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> McpResult<()> {
        self.connected = false;
        self.endpoint = None;
        self.events = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_scheme() {
        assert!(SseTransport::new("file:///etc/passwd".to_string(), BTreeMap::new()).is_err());
        assert!(SseTransport::new("https://example.com/sse".to_string(), BTreeMap::new()).is_ok());
    }
}
