//! mcpproxy entry point

use axum::Extension;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mcpproxy_cache::{ResponseCache, Truncator};
use mcpproxy_config::{ConfigLoader, ProxyConfig};
use mcpproxy_index::ToolIndex;
use mcpproxy_js::SandboxPool;
use mcpproxy_mcp::UpstreamManager;
use mcpproxy_oauth::FlowCoordinator;

use mcpproxy_server::activity::ActivityLog;
use mcpproxy_server::indexer::{run_indexer, CoordinatorBroker};
use mcpproxy_server::listener::{bind_tcp, prepare_data_dir, ConnectionSource};
use mcpproxy_server::proxy::code_exec::ManagerCaller;
use mcpproxy_server::rest;
use mcpproxy_server::state::{AppState, ConfigStore};
use mcpproxy_server::{ServerError, ServerResult};

#[derive(Debug, Parser)]
#[command(
    name = "mcpproxy",
    version,
    about = "Smart MCP proxy: aggregate upstream MCP servers behind one searchable endpoint"
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, host:port
    #[arg(long)]
    listen: Option<String>,

    /// Data directory for the IPC socket and state
    #[arg(long, env = "MCPPROXY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("{}", e);
        eprintln!("mcpproxy: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> ServerResult<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load().map_err(|e| ServerError::Config {
        message: e.to_string(),
    })?;

    init_tracing(&config);

    if let Some(listen) = &args.listen {
        apply_listen_override(&mut config, listen)?;
    }

    let data_dir = resolve_data_dir(&args, &config);
    prepare_data_dir(&data_dir)?;

    // Wiring order follows the dependency direction: coordinator and store
    // first, then the manager with its OAuth broker, then the surfaces.
    let store = Arc::new(ConfigStore::new(config.clone(), args.config.clone()));
    let coordinator = FlowCoordinator::new();
    let broker: Arc<dyn mcpproxy_mcp::OAuthBroker> =
        CoordinatorBroker::new(coordinator.clone(), store.clone());
    let manager = UpstreamManager::new(Some(broker));
    let index = Arc::new(ToolIndex::new());
    let cache = Arc::new(ResponseCache::new(
        config.truncation.cache_capacity,
        config.truncation.cache_ttl,
    ));
    let truncator = Truncator::new(
        config.truncation.limit_bytes,
        config.truncation.preview_records,
    );
    let caller = Arc::new(ManagerCaller::new(manager.clone(), store.clone()));
    let sandbox = Arc::new(SandboxPool::new(config.sandbox.clone(), caller));
    let activity = ActivityLog::new(None);

    for (name, upstream) in &config.mcp_servers {
        if let Err(e) = manager.add_config(name, upstream.clone()) {
            tracing::warn!(server = %name, "skipping upstream: {}", e);
        }
    }

    let ipc_enabled = config.listen.ipc_enabled;
    let ipc_path = if cfg!(unix) && ipc_enabled {
        Some(
            data_dir
                .join(mcpproxy_server::listener::SOCKET_FILE)
                .display()
                .to_string(),
        )
    } else {
        None
    };

    let state = AppState::with_ipc_path(
        store,
        manager.clone(),
        index.clone(),
        cache,
        truncator,
        sandbox,
        activity,
        coordinator,
        ipc_path,
    );

    tokio::spawn(run_indexer(
        manager.clone(),
        index.clone(),
        state.events.clone(),
    ));
    tokio::spawn(manager.clone().run_connector());

    let (tcp, bound_addr) = bind_tcp(
        &config.listen.host,
        config.listen.port,
        config.listen.port_probe_window,
    )
    .await?;
    *state.listen_addr.write() = bound_addr.to_string();
    tracing::info!(addr = %bound_addr, "listening on tcp");

    let router = rest::router(state.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let tcp_router = router.clone().layer(Extension(ConnectionSource::Tcp));
    let mut tcp_shutdown = shutdown_rx.clone();
    let tcp_serve = tokio::spawn(async move {
        axum::serve(tcp, tcp_router)
            .with_graceful_shutdown(async move {
                let _ = tcp_shutdown.changed().await;
            })
            .await
    });

    #[cfg(unix)]
    let ipc_serve = if ipc_enabled {
        let ipc = mcpproxy_server::listener::bind_ipc(&data_dir)?;
        tracing::info!(path = %ipc.path().display(), "listening on ipc socket");
        let ipc_router = router.clone().layer(Extension(ConnectionSource::Tray));
        let mut ipc_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            axum::serve(ipc, ipc_router)
                .with_graceful_shutdown(async move {
                    let _ = ipc_shutdown.changed().await;
                })
                .await
        }))
    } else {
        None
    };

    state
        .events
        .publish_status(true, serde_json::json!({"started": true}));

    let tcp_result = tcp_serve.await;
    #[cfg(unix)]
    if let Some(ipc_serve) = ipc_serve {
        let _ = ipc_serve.await;
    }

    // Drain upstream clients after the listeners stop accepting
    manager.shutdown().await;
    state
        .events
        .publish_status(false, serde_json::json!({"stopped": true}));

    match tcp_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Io(e)),
        Err(e) => Err(ServerError::Internal(e.to_string())),
    }
}

fn init_tracing(config: &ProxyConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn apply_listen_override(config: &mut ProxyConfig, listen: &str) -> ServerResult<()> {
    let (host, port) = listen.rsplit_once(':').ok_or_else(|| ServerError::Config {
        message: format!("--listen must be host:port, got '{}'", listen),
    })?;
    config.listen.host = host.to_string();
    config.listen.port = port.parse().map_err(|_| ServerError::Config {
        message: format!("invalid port in --listen: '{}'", port),
    })?;
    Ok(())
}

fn resolve_data_dir(args: &Args, config: &ProxyConfig) -> PathBuf {
    if let Some(dir) = &args.data_dir {
        return dir.clone();
    }
    if let Some(dir) = &config.listen.data_dir {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".mcpproxy");
    }
    PathBuf::from(".mcpproxy")
}
