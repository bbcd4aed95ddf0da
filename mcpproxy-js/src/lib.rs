//! JavaScript tool-orchestration sandbox
//!
//! User-supplied snippets run in a pooled Boa runtime with a wall-clock
//! timeout, a tool-call budget, and an optional server allow-list. Scripts
//! see an `input` value and a synchronous `callTool(server, tool, args)`
//! host function bridged to the async upstream manager.

pub mod bridge;
pub mod execution;
pub mod pool;
pub mod types;

pub use bridge::{ToolBridge, UpstreamCaller};
pub use pool::SandboxPool;
pub use types::{
    ExecuteOptions, ExecuteRequest, ExecutionError, ExecutionResult, ToolCallRecord,
};

use thiserror::Error;

/// JavaScript execution errors
#[derive(Error, Debug)]
pub enum JsExecutionError {
    #[error("Compilation error: {0}")]
    CompilationError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Input preparation error: {0}")]
    InputError(String),

    #[error("Output conversion error: {0}")]
    OutputError(String),
}

/// Machine-readable error codes in the result envelope
pub mod codes {
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const TOOL_CALL_LIMIT_EXCEEDED: &str = "TOOL_CALL_LIMIT_EXCEEDED";
    pub const SERVER_NOT_ALLOWED: &str = "SERVER_NOT_ALLOWED";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const SCRIPT_ERROR: &str = "SCRIPT_ERROR";
}
