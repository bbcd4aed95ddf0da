//! Shared application state and configuration store

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use mcpproxy_cache::{ResponseCache, Truncator};
use mcpproxy_config::{diff_configs, ProxyConfig, SecurityConfig, UpstreamConfig};
use mcpproxy_index::ToolIndex;
use mcpproxy_js::SandboxPool;
use mcpproxy_mcp::UpstreamManager;
use mcpproxy_oauth::FlowCoordinator;

use crate::activity::ActivityLog;
use crate::events::EventHub;
use crate::session::SessionStore;
use crate::stats::UsageStats;

/// The running configuration plus its persistence location.
///
/// The YAML file is the system of record for upstream entries; management
/// operations write through so a restart sees the same world.
pub struct ConfigStore {
    config: RwLock<ProxyConfig>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new(config: ProxyConfig, path: Option<PathBuf>) -> Self {
        Self {
            config: RwLock::new(config),
            path,
        }
    }

    pub fn get(&self) -> ProxyConfig {
        self.config.read().clone()
    }

    pub fn security(&self) -> SecurityConfig {
        self.config.read().security.clone()
    }

    pub fn upstream(&self, name: &str) -> Option<UpstreamConfig> {
        self.config.read().mcp_servers.get(name).cloned()
    }

    /// Insert or replace one upstream entry and persist
    pub fn set_upstream(&self, name: &str, upstream: UpstreamConfig) {
        self.config
            .write()
            .mcp_servers
            .insert(name.to_string(), upstream);
        self.save();
    }

    /// Drop one upstream entry and persist
    pub fn remove_upstream(&self, name: &str) -> bool {
        let removed = self.config.write().mcp_servers.remove(name).is_some();
        if removed {
            self.save();
        }
        removed
    }

    /// Swap in a whole new configuration, returning the changed field names
    pub fn replace(&self, new_config: ProxyConfig) -> Vec<String> {
        let changed = {
            let mut config = self.config.write();
            let changed = diff_configs(&config, &new_config);
            *config = new_config;
            changed
        };
        if !changed.is_empty() {
            self.save();
        }
        changed
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        let config = self.config.read().clone();
        match serde_yaml::to_string(&config) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(path, raw) {
                    tracing::error!(path = %path.display(), "failed to persist config: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to serialize config: {}", e),
        }
    }
}

/// Everything the handlers need, shared behind one `Arc`
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub manager: Arc<UpstreamManager>,
    pub index: Arc<ToolIndex>,
    pub cache: Arc<ResponseCache>,
    pub truncator: Truncator,
    pub sandbox: Arc<SandboxPool>,
    pub activity: Arc<ActivityLog>,
    pub stats: Arc<UsageStats>,
    pub sessions: Arc<SessionStore>,
    pub coordinator: Arc<FlowCoordinator>,
    pub events: EventHub,

    /// The address actually bound, after any port probing
    pub listen_addr: RwLock<String>,

    /// IPC endpoint path, when the listener is enabled
    pub ipc_path: Option<String>,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConfigStore>,
        manager: Arc<UpstreamManager>,
        index: Arc<ToolIndex>,
        cache: Arc<ResponseCache>,
        truncator: Truncator,
        sandbox: Arc<SandboxPool>,
        activity: Arc<ActivityLog>,
        coordinator: Arc<FlowCoordinator>,
    ) -> Arc<Self> {
        Self::with_ipc_path(
            config, manager, index, cache, truncator, sandbox, activity, coordinator, None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_ipc_path(
        config: Arc<ConfigStore>,
        manager: Arc<UpstreamManager>,
        index: Arc<ToolIndex>,
        cache: Arc<ResponseCache>,
        truncator: Truncator,
        sandbox: Arc<SandboxPool>,
        activity: Arc<ActivityLog>,
        coordinator: Arc<FlowCoordinator>,
        ipc_path: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            manager,
            index,
            cache,
            truncator,
            sandbox,
            activity,
            stats: Arc::new(UsageStats::new()),
            sessions: Arc::new(SessionStore::new()),
            coordinator,
            events: EventHub::new(),
            listen_addr: RwLock::new(String::new()),
            ipc_path,
            started_at: Utc::now(),
        })
    }

    /// Whether `server` is quarantined, preferring the live client's view
    pub fn is_quarantined(&self, server: &str) -> bool {
        if let Some(client) = self.manager.get_client(server) {
            return client.config().quarantined;
        }
        self.config
            .upstream(server)
            .map(|u| u.quarantined)
            .unwrap_or(false)
    }
}
