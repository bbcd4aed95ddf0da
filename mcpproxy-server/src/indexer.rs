//! Applies upstream events to the tool index
//!
//! The manager publishes tool sets; this task is the only index writer, so
//! per-server batches stay atomic and the manager stays storage-agnostic.
//! It also hosts the OAuth broker adapter handed to upstream clients.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use mcpproxy_index::{ToolIndex, ToolMetadata};
use mcpproxy_mcp::{OAuthBroker, ToolDescriptor, UpstreamEvent, UpstreamManager};
use mcpproxy_oauth::{
    discover_protected_resource_metadata, merge_extra_params, FlowCoordinator, FlowState,
};

use crate::events::EventHub;
use crate::state::ConfigStore;

/// Deadline for one RFC 9728 metadata fetch
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Convert a manager descriptor into index metadata
pub fn descriptor_to_metadata(descriptor: &ToolDescriptor) -> ToolMetadata {
    let mut meta = ToolMetadata::new(
        &descriptor.server_name,
        &descriptor.tool_name,
        &descriptor.description,
        serde_json::to_string(&descriptor.input_schema).unwrap_or_else(|_| "{}".to_string()),
        &descriptor.hash,
    );
    meta.annotations = descriptor
        .annotations
        .as_ref()
        .and_then(|a| serde_json::to_value(a).ok());
    meta
}

/// Run until the manager's event channel closes
pub async fn run_indexer(manager: Arc<UpstreamManager>, index: Arc<ToolIndex>, events: EventHub) {
    let mut receiver = manager.subscribe();

    loop {
        match receiver.recv().await {
            Ok(UpstreamEvent::ToolsUpdated { server, tools }) => {
                let metas: Vec<ToolMetadata> =
                    tools.iter().map(descriptor_to_metadata).collect();
                tracing::info!(server = %server, tools = metas.len(), "indexing tool set");
                index.batch_index_tools(&server, metas);
            }
            Ok(UpstreamEvent::ToolsRemoved { server }) => {
                tracing::info!(server = %server, "removing tools from index");
                index.delete_server_tools(&server);
            }
            Ok(UpstreamEvent::StateChanged { server, state }) => {
                events.publish_status(
                    true,
                    serde_json::json!({"server": server, "state": state}),
                );
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "indexer lagged behind upstream events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// OAuth broker handed to upstream clients: starts the single-flight flow,
/// runs resource discovery, and leaves interactive authorization to the
/// out-of-band surfaces.
pub struct CoordinatorBroker {
    coordinator: Arc<FlowCoordinator>,
    config: Arc<ConfigStore>,
}

impl CoordinatorBroker {
    pub fn new(coordinator: Arc<FlowCoordinator>, config: Arc<ConfigStore>) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            config,
        })
    }
}

#[async_trait]
impl OAuthBroker for CoordinatorBroker {
    async fn on_auth_required(&self, server: &str, resource_metadata: Option<&str>) {
        let flow = match self.coordinator.start_flow(server) {
            Ok(flow) => flow,
            // A flow is already running; this 401 is part of it
            Err(_) => return,
        };

        let upstream = self.config.upstream(server);
        let Some(upstream) = upstream else {
            self.coordinator
                .end_flow(server, Err("server has no configuration".to_string()));
            return;
        };

        let coordinator = self.coordinator.clone();
        let server = server.to_string();
        let metadata_url = resource_metadata.map(|s| s.to_string());

        tokio::spawn(async move {
            coordinator.update_flow(&server, FlowState::Authenticating);

            let discovered = match &metadata_url {
                Some(url) => {
                    match discover_protected_resource_metadata(url, DISCOVERY_TIMEOUT).await {
                        Ok(metadata) => metadata.resource,
                        Err(e) => {
                            tracing::warn!(server = %server, "resource discovery failed: {}", e);
                            None
                        }
                    }
                }
                None => None,
            };

            let configured = upstream
                .oauth
                .as_ref()
                .map(|o| o.extra_params.clone())
                .unwrap_or_default();
            let fallback = upstream.url.clone().unwrap_or_default();
            let extras = merge_extra_params(&configured, discovered.as_deref(), &fallback);

            tracing::warn!(
                server = %server,
                correlation_id = %flow.correlation_id,
                resource = extras.get("resource").map(String::as_str).unwrap_or(""),
                "upstream requires authorization; complete the login from the tray or CLI"
            );

            // Interactive authorization happens out-of-band. Ending the flow
            // here keeps the connector retrying on its backoff schedule
            // instead of pinning the client in AuthPending forever.
            coordinator.end_flow(
                &server,
                Err("interactive authorization required".to_string()),
            );
        });
    }

    fn is_flow_active(&self, server: &str) -> bool {
        self.coordinator.is_flow_active(server)
    }
}
