//! Registry and lifecycle management for all configured upstreams

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;

use crate::backoff::Backoff;
use crate::client::{ConnectionState, OAuthBroker, UpstreamClient};
use crate::error::{McpError, McpResult};
use crate::protocol::{Tool, ToolAnnotations, ToolsCallResult};
use mcpproxy_config::UpstreamConfig;

/// Concurrent connect attempts allowed from the connector loop
const CONNECT_PARALLELISM: usize = 4;

/// How often the connector loop scans for work
const CONNECTOR_INTERVAL: Duration = Duration::from_secs(2);

/// A tool plus its indexable identity and fingerprint
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub annotations: Option<ToolAnnotations>,
    /// Content fingerprint of description + schema
    pub hash: String,
}

/// Events published to the indexer and control plane
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A server reached Ready and reported this tool set; replaces any
    /// previously indexed set for that server atomically
    ToolsUpdated {
        server: String,
        tools: Vec<ToolDescriptor>,
    },
    /// A server left Ready (disconnect or removal); its tools must go
    ToolsRemoved { server: String },
    /// Connection state changed
    StateChanged {
        server: String,
        state: ConnectionState,
    },
}

/// Point-in-time status of one upstream
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub protocol: String,
    pub enabled: bool,
    pub quarantined: bool,
    pub connected: bool,
    pub state: ConnectionState,
    pub tool_count: usize,
}

/// Build the public `"server:tool"` identifier
pub fn tool_id(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, crate::TOOL_NAME_DELIMITER, tool)
}

/// Split a `"server:tool"` identifier
pub fn parse_tool_id(id: &str) -> Option<(&str, &str)> {
    let (server, tool) = id.split_once(crate::TOOL_NAME_DELIMITER)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Owns every [`UpstreamClient`] and keeps them connected.
///
/// Tool sets flow out through the event channel; the server crate applies
/// them to the index so this crate stays storage-agnostic.
pub struct UpstreamManager {
    clients: RwLock<HashMap<String, Arc<UpstreamClient>>>,
    tool_counts: RwLock<HashMap<String, usize>>,
    backoffs: Mutex<HashMap<String, Backoff>>,
    events: broadcast::Sender<UpstreamEvent>,
    oauth: Option<Arc<dyn OAuthBroker>>,
    connect_limit: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl UpstreamManager {
    pub fn new(oauth: Option<Arc<dyn OAuthBroker>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            tool_counts: RwLock::new(HashMap::new()),
            backoffs: Mutex::new(HashMap::new()),
            events,
            oauth,
            connect_limit: Arc::new(Semaphore::new(CONNECT_PARALLELISM)),
            shutdown_tx,
        })
    }

    /// Subscribe to tool-set and state events
    pub fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events.subscribe()
    }

    /// Register a server without connecting. Fails on duplicate names.
    pub fn add_config(&self, name: &str, config: UpstreamConfig) -> McpResult<Arc<UpstreamClient>> {
        let mut clients = self.clients.write();
        if clients.contains_key(name) {
            return Err(McpError::Configuration {
                message: format!("server '{}' already exists", name),
            });
        }

        let client = Arc::new(UpstreamClient::new(name, config, self.oauth.clone()));
        clients.insert(name.to_string(), client.clone());
        Ok(client)
    }

    /// Register a server and connect it right away. The connector loop
    /// takes over on failure.
    pub async fn add_server(
        &self,
        name: &str,
        config: UpstreamConfig,
    ) -> McpResult<Arc<UpstreamClient>> {
        let should_connect = config.enabled && !config.quarantined;
        let client = self.add_config(name, config)?;
        if should_connect {
            self.connect_and_publish(name.to_string()).await;
        }
        Ok(client)
    }

    /// Tear down and forget a server; its tools are withdrawn.
    pub async fn remove_server(&self, name: &str) -> McpResult<()> {
        let client = {
            let mut clients = self.clients.write();
            clients.remove(name)
        }
        .ok_or_else(|| McpError::Configuration {
            message: format!("server '{}' not found", name),
        })?;

        client.disconnect().await;
        self.tool_counts.write().remove(name);
        self.backoffs.lock().remove(name);
        let _ = self.events.send(UpstreamEvent::ToolsRemoved {
            server: name.to_string(),
        });
        Ok(())
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<UpstreamClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Apply a new configuration to an existing server and reconnect it if
    /// it should be running.
    pub async fn update_server(&self, name: &str, config: UpstreamConfig) -> McpResult<()> {
        let client = self.get_client(name).ok_or_else(|| McpError::Configuration {
            message: format!("server '{}' not found", name),
        })?;

        let should_run = config.enabled && !config.quarantined;
        client.update_config(config);

        client.disconnect().await;
        self.tool_counts.write().remove(name);
        let _ = self.events.send(UpstreamEvent::ToolsRemoved {
            server: name.to_string(),
        });

        if should_run {
            self.connect_and_publish(name.to_string()).await;
        }
        Ok(())
    }

    /// Disconnect and immediately reconnect one server
    pub async fn restart_server(&self, name: &str) -> McpResult<()> {
        let client = self.get_client(name).ok_or_else(|| McpError::Configuration {
            message: format!("server '{}' not found", name),
        })?;

        client.disconnect().await;
        let _ = self.events.send(UpstreamEvent::ToolsRemoved {
            server: name.to_string(),
        });
        self.connect_and_publish(name.to_string()).await;
        Ok(())
    }

    /// Call `"server:tool"` on the owning upstream
    pub async fn call_tool(&self, qualified: &str, arguments: Option<Value>) -> McpResult<ToolsCallResult> {
        let (server, tool) = parse_tool_id(qualified).ok_or_else(|| McpError::Configuration {
            message: format!(
                "invalid tool name '{}': expected \"server{}tool\"",
                qualified,
                crate::TOOL_NAME_DELIMITER
            ),
        })?;

        let client = self.get_client(server).ok_or_else(|| McpError::Configuration {
            message: format!("server '{}' not found", server),
        })?;

        client.call_tool(tool, arguments).await
    }

    /// Status of every registered upstream, sorted by name
    pub fn list_all(&self) -> Vec<UpstreamStatus> {
        let counts = self.tool_counts.read();
        let mut statuses: Vec<UpstreamStatus> = self
            .clients
            .read()
            .values()
            .map(|client| {
                let config = client.config();
                UpstreamStatus {
                    name: client.name().to_string(),
                    protocol: config.protocol.as_str().to_string(),
                    enabled: config.enabled,
                    quarantined: config.quarantined,
                    connected: client.is_connected(),
                    state: client.state(),
                    tool_count: counts.get(client.name()).copied().unwrap_or(0),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Total number of tools across all Ready upstreams
    pub fn total_tool_count(&self) -> usize {
        self.tool_counts.read().values().sum()
    }

    /// Recent stderr lines from a stdio upstream
    pub fn stderr_tail(&self, name: &str, lines: usize) -> McpResult<Vec<String>> {
        let client = self.get_client(name).ok_or_else(|| McpError::Configuration {
            message: format!("server '{}' not found", name),
        })?;
        Ok(client.stderr().tail(lines))
    }

    /// Run the background connector until shutdown. One cooperative loop:
    /// scans for upstreams that should be connected but are not, and
    /// connects them in parallel under a bounded permit.
    pub async fn run_connector(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(CONNECTOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("connector loop stopping");
                        return;
                    }
                }
            }

            let candidates = self.connect_candidates();
            if candidates.is_empty() {
                continue;
            }

            let mut attempts = JoinSet::new();
            for name in candidates {
                let manager = self.clone();
                attempts.spawn(async move {
                    manager.connect_and_publish(name).await;
                });
            }
            while attempts.join_next().await.is_some() {}
        }
    }

    /// Stop the connector loop and disconnect every upstream
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let clients: Vec<Arc<UpstreamClient>> = self.clients.read().values().cloned().collect();
        for client in clients {
            client.disconnect().await;
        }
    }

    fn connect_candidates(&self) -> Vec<String> {
        let backoffs = self.backoffs.lock();
        self.clients
            .read()
            .values()
            .filter(|client| {
                let config = client.config();
                if !config.enabled || config.quarantined {
                    return false;
                }
                match client.state() {
                    ConnectionState::Idle | ConnectionState::Error => backoffs
                        .get(client.name())
                        .map(|b| b.is_due())
                        .unwrap_or(true),
                    // Stuck waiting for OAuth: retry once the flow is over,
                    // still pacing attempts through the backoff
                    ConnectionState::AuthPending => {
                        let flow_done = self
                            .oauth
                            .as_ref()
                            .map(|broker| !broker.is_flow_active(client.name()))
                            .unwrap_or(true);
                        flow_done
                            && backoffs
                                .get(client.name())
                                .map(|b| b.is_due())
                                .unwrap_or(true)
                    }
                    _ => false,
                }
            })
            .map(|client| client.name().to_string())
            .collect()
    }

    async fn connect_and_publish(&self, name: String) {
        let Some(client) = self.get_client(&name) else {
            return;
        };

        let Ok(_permit) = self.connect_limit.acquire().await else {
            return;
        };

        match client.connect().await {
            Ok(()) => {
                self.backoffs.lock().entry(name.clone()).or_default().record_success();
                let _ = self.events.send(UpstreamEvent::StateChanged {
                    server: name.clone(),
                    state: client.state(),
                });
                self.refresh_tools(&name, &client).await;
            }
            Err(e) => {
                tracing::warn!(server = %name, "connect attempt failed: {}", e);
                self.backoffs.lock().entry(name.clone()).or_default().record_failure();
                let _ = self.events.send(UpstreamEvent::StateChanged {
                    server: name.clone(),
                    state: client.state(),
                });
            }
        }
    }

    async fn refresh_tools(&self, name: &str, client: &Arc<UpstreamClient>) {
        match client.list_tools().await {
            Ok(tools) => {
                let descriptors: Vec<ToolDescriptor> = tools
                    .iter()
                    .map(|tool| describe_tool(name, tool))
                    .collect();

                self.tool_counts
                    .write()
                    .insert(name.to_string(), descriptors.len());
                let _ = self.events.send(UpstreamEvent::ToolsUpdated {
                    server: name.to_string(),
                    tools: descriptors,
                });
            }
            Err(e) => {
                tracing::warn!(server = %name, "failed to list tools: {}", e);
            }
        }
    }
}

/// Sanitize one upstream tool into its indexable descriptor, fingerprinting
/// the description + schema so unchanged tools can be recognized.
pub fn describe_tool(server: &str, tool: &Tool) -> ToolDescriptor {
    let schema_text = serde_json::to_string(&tool.input_schema).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(tool.description.as_bytes());
    hasher.update([0u8]);
    hasher.update(schema_text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    ToolDescriptor {
        server_name: server.to_string(),
        tool_name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
        annotations: tool.annotations.clone(),
        hash,
    }
}
