//! Bridge between synchronous script code and the async upstream manager

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::codes;
use crate::types::ToolCallRecord;

/// The async side of a sandboxed tool call. The server crate implements
/// this over the upstream manager; tests substitute canned responses.
#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<Value, String>;
}

/// Per-execution tool-call adapter: allow-list, budget, and recording.
///
/// One instance exists per execution, shared between the async side (which
/// reads the records afterwards) and the blocking script thread.
pub struct ToolBridge {
    caller: Arc<dyn UpstreamCaller>,
    runtime: tokio::runtime::Handle,
    max_tool_calls: u32,
    allowed_servers: Option<Vec<String>>,
    calls_made: AtomicU32,
    records: Mutex<Vec<ToolCallRecord>>,
}

impl ToolBridge {
    pub fn new(
        caller: Arc<dyn UpstreamCaller>,
        runtime: tokio::runtime::Handle,
        max_tool_calls: u32,
        allowed_servers: Option<Vec<String>>,
    ) -> Self {
        Self {
            caller,
            runtime,
            max_tool_calls,
            allowed_servers,
            calls_made: AtomicU32::new(0),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Synchronous entry point for the `callTool` host function. Runs on
    /// the blocking script thread; the upstream future executes on the
    /// runtime this bridge was built with.
    pub fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, String> {
        if let Some(allowed) = &self.allowed_servers {
            if !allowed.iter().any(|entry| entry == server) {
                return Err(format!(
                    "{}: server '{}' is not in the allowed list",
                    codes::SERVER_NOT_ALLOWED,
                    server
                ));
            }
        }

        if self.max_tool_calls > 0 {
            let made = self.calls_made.fetch_add(1, Ordering::SeqCst);
            if made >= self.max_tool_calls {
                return Err(format!(
                    "{}: execution exceeded its budget of {} tool calls",
                    codes::TOOL_CALL_LIMIT_EXCEEDED,
                    self.max_tool_calls
                ));
            }
        } else {
            self.calls_made.fetch_add(1, Ordering::SeqCst);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let outcome = self
            .runtime
            .block_on(self.caller.call_tool(server, tool, args));
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, error) = match &outcome {
            Ok(_) => (true, None),
            Err(message) => (false, Some(message.clone())),
        };
        self.records.lock().push(ToolCallRecord {
            server: server.to_string(),
            tool: tool.to_string(),
            started_at,
            duration_ms,
            success,
            error,
        });

        outcome.map_err(|message| format!("{}: {}", codes::UPSTREAM_ERROR, message))
    }

    /// Records accumulated so far
    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.records.lock().clone()
    }

    pub fn calls_made(&self) -> u32 {
        self.calls_made.load(Ordering::SeqCst)
    }
}

thread_local! {
    static CURRENT_BRIDGE: RefCell<Option<Arc<ToolBridge>>> = const { RefCell::new(None) };
}

/// Install `bridge` as this thread's bridge for the duration of `f`.
/// Script threads are pooled, so the slot is cleared even on unwind.
pub fn with_bridge<R>(bridge: Arc<ToolBridge>, f: impl FnOnce() -> R) -> R {
    struct ClearGuard;
    impl Drop for ClearGuard {
        fn drop(&mut self) {
            CURRENT_BRIDGE.with(|slot| *slot.borrow_mut() = None);
        }
    }

    CURRENT_BRIDGE.with(|slot| *slot.borrow_mut() = Some(bridge));
    let _guard = ClearGuard;
    f()
}

/// The bridge installed on this thread, if any
pub fn current_bridge() -> Option<Arc<ToolBridge>> {
    CURRENT_BRIDGE.with(|slot| slot.borrow().clone())
}
