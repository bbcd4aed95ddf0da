//! Request and result envelopes for sandbox executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Hard ceiling on the per-execution timeout (10 minutes)
pub const TIMEOUT_CEILING: Duration = Duration::from_secs(600);

/// Per-execution limits, defaulted from configuration
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Wall-clock budget
    pub timeout: Duration,

    /// Upstream calls allowed; 0 means unlimited
    pub max_tool_calls: u32,

    /// When set, `callTool` only reaches these servers
    pub allowed_servers: Option<Vec<String>>,
}

impl ExecuteOptions {
    /// Clamp the timeout into [1ms, 10min]
    pub fn clamped(mut self) -> Self {
        self.timeout = self
            .timeout
            .max(Duration::from_millis(1))
            .min(TIMEOUT_CEILING);
        self
    }
}

/// One sandbox execution
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// The script. Either an expression (its completion value is the
    /// result) or a program defining `main(input)`.
    pub code: String,

    /// Value bound to `input` inside the script
    pub input: Value,

    pub options: ExecuteOptions,
}

/// One upstream call made by a script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub server: String,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error half of the result envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

/// Result envelope returned for every execution, success or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    pub tool_calls: Vec<ToolCallRecord>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(result: Value, tool_calls: Vec<ToolCallRecord>, duration_ms: u64) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            tool_calls,
            duration_ms,
        }
    }

    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
        duration_ms: u64,
    ) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ExecutionError {
                code: code.into(),
                message: message.into(),
            }),
            tool_calls,
            duration_ms,
        }
    }
}
