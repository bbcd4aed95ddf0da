//! Single-flight OAuth flow coordination
//!
//! At most one flow runs per server. Concurrent starters observe the running
//! flow; waiters are released together when it ends, whichever way it ends.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{OAuthError, OAuthResult};

/// Lifecycle of one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Initiated,
    Authenticating,
    TokenExchange,
    Completed,
    Failed,
}

/// One in-flight OAuth flow
#[derive(Debug, Clone, Serialize)]
pub struct FlowContext {
    pub correlation_id: Uuid,
    pub server_name: String,
    pub state: FlowState,
    pub started_at: DateTime<Utc>,
}

/// Process-wide flow registry. Constructed per process in production and
/// per test elsewhere; nothing in here is a true global.
#[derive(Default)]
pub struct FlowCoordinator {
    flows: Mutex<HashMap<String, FlowContext>>,
    ended: Notify,
}

impl FlowCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin a flow for `server`. Exactly one concurrent caller wins; the
    /// rest get [`OAuthError::FlowInProgress`].
    pub fn start_flow(&self, server: &str) -> OAuthResult<FlowContext> {
        let mut flows = self.flows.lock();
        if flows.contains_key(server) {
            return Err(OAuthError::FlowInProgress {
                server: server.to_string(),
            });
        }

        let context = FlowContext {
            correlation_id: Uuid::new_v4(),
            server_name: server.to_string(),
            state: FlowState::Initiated,
            started_at: Utc::now(),
        };
        flows.insert(server.to_string(), context.clone());

        tracing::info!(
            server = %server,
            correlation_id = %context.correlation_id,
            "oauth flow started"
        );
        Ok(context)
    }

    /// Advance the state of a running flow
    pub fn update_flow(&self, server: &str, state: FlowState) {
        if let Some(flow) = self.flows.lock().get_mut(server) {
            flow.state = state;
        }
    }

    /// Finish the flow for `server` and release every waiter
    pub fn end_flow(&self, server: &str, outcome: Result<(), String>) {
        let removed = self.flows.lock().remove(server);

        if let Some(flow) = removed {
            match &outcome {
                Ok(()) => tracing::info!(
                    server = %server,
                    correlation_id = %flow.correlation_id,
                    "oauth flow completed"
                ),
                Err(reason) => tracing::warn!(
                    server = %server,
                    correlation_id = %flow.correlation_id,
                    reason = %reason,
                    "oauth flow failed"
                ),
            }
        }

        self.ended.notify_waiters();
    }

    /// Whether a flow is currently running for `server`
    pub fn is_flow_active(&self, server: &str) -> bool {
        self.flows.lock().contains_key(server)
    }

    /// The running flow for `server`, if any
    pub fn active_flow(&self, server: &str) -> Option<FlowContext> {
        self.flows.lock().get(server).cloned()
    }

    /// Block until the flow for `server` ends. Returns immediately when no
    /// flow is active; times out with a distinguished error.
    pub async fn wait_for_flow(&self, server: &str, timeout: Duration) -> OAuthResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before the check so an end between check and
            // await cannot be missed.
            let ended = self.ended.notified();

            if !self.is_flow_active(server) {
                return Ok(());
            }

            tokio::select! {
                _ = ended => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(OAuthError::Timeout {
                        server: server.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_flight_per_server() {
        let coordinator = FlowCoordinator::new();

        let flow = coordinator.start_flow("github").unwrap();
        assert_eq!(flow.state, FlowState::Initiated);
        assert!(coordinator.is_flow_active("github"));

        // Second starter for the same server loses
        assert!(matches!(
            coordinator.start_flow("github"),
            Err(OAuthError::FlowInProgress { .. })
        ));

        // Different server is unaffected
        assert!(coordinator.start_flow("jira").is_ok());

        coordinator.end_flow("github", Ok(()));
        assert!(!coordinator.is_flow_active("github"));
        assert!(coordinator.start_flow("github").is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_without_flow() {
        let coordinator = FlowCoordinator::new();
        coordinator
            .wait_for_flow("github", Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let coordinator = FlowCoordinator::new();
        coordinator.start_flow("github").unwrap();

        let err = coordinator
            .wait_for_flow("github", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_end_flow_releases_all_waiters() {
        let coordinator = FlowCoordinator::new();
        coordinator.start_flow("github").unwrap();

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            waiters.push(tokio::spawn(async move {
                coordinator
                    .wait_for_flow("github", Duration::from_secs(5))
                    .await
            }));
        }

        // Let the waiters park
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.end_flow("github", Err("denied".to_string()));

        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_exactly_one_concurrent_starter_wins() {
        let coordinator = FlowCoordinator::new();

        let mut starters = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            starters.push(tokio::spawn(async move {
                coordinator.start_flow("solo").is_ok()
            }));
        }

        let mut wins = 0;
        for starter in starters {
            if starter.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
