//! Bounded runtime pool

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::bridge::{with_bridge, ToolBridge, UpstreamCaller};
use crate::codes;
use crate::execution::execute_script;
use crate::types::{ExecuteRequest, ExecutionResult};
use mcpproxy_config::SandboxConfig;

/// Gates concurrent executions to the configured pool size. Each execution
/// gets a fresh Boa context on a blocking thread; cross-script parallelism
/// is bounded by the semaphore, so scripts never share a runtime.
pub struct SandboxPool {
    permits: Arc<Semaphore>,
    caller: Arc<dyn UpstreamCaller>,
    config: SandboxConfig,
}

impl SandboxPool {
    pub fn new(config: SandboxConfig, caller: Arc<dyn UpstreamCaller>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.pool_size.max(1))),
            caller,
            config,
        }
    }

    /// Defaults applied to requests that omit options
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one script. Always returns an envelope; errors are carried in
    /// it rather than bubbling. Acquisition respects cancellation: dropping
    /// the returned future while queued releases nothing it did not own.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecutionResult {
        let started = Instant::now();
        let options = request.options.clamped();

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult::failure(
                    codes::SCRIPT_ERROR,
                    "sandbox pool is shut down",
                    Vec::new(),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let bridge = Arc::new(ToolBridge::new(
            self.caller.clone(),
            tokio::runtime::Handle::current(),
            options.max_tool_calls,
            options.allowed_servers.clone(),
        ));

        let script_bridge = bridge.clone();
        let code = request.code.clone();
        let input = request.input.clone();
        let join = tokio::task::spawn_blocking(move || {
            with_bridge(script_bridge, || execute_script(&code, &input))
        });

        let outcome = tokio::time::timeout(options.timeout, join).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let tool_calls = bridge.records();

        match outcome {
            Err(_) => {
                tracing::warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    "script execution timed out; the runtime thread will finish in the background"
                );
                ExecutionResult::failure(
                    codes::TIMEOUT,
                    format!(
                        "execution exceeded its {}ms budget",
                        options.timeout.as_millis()
                    ),
                    tool_calls,
                    duration_ms,
                )
            }
            Ok(Err(join_error)) => ExecutionResult::failure(
                codes::SCRIPT_ERROR,
                format!("execution aborted: {}", join_error),
                tool_calls,
                duration_ms,
            ),
            Ok(Ok(Ok(value))) => ExecutionResult::success(value, tool_calls, duration_ms),
            Ok(Ok(Err(script_error))) => {
                let message = script_error.to_string();
                ExecutionResult::failure(classify(&message), message, tool_calls, duration_ms)
            }
        }
    }
}

/// Map a script failure message onto its envelope code. Bridge errors are
/// thrown into JS with their code as a message prefix, which survives here
/// unless the script caught and replaced them.
fn classify(message: &str) -> &'static str {
    for code in [
        codes::TOOL_CALL_LIMIT_EXCEEDED,
        codes::SERVER_NOT_ALLOWED,
        codes::UPSTREAM_ERROR,
    ] {
        if message.contains(code) {
            return code;
        }
    }
    codes::SCRIPT_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecuteOptions;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct EchoCaller;

    #[async_trait]
    impl UpstreamCaller for EchoCaller {
        async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<Value, String> {
            if server == "failing" {
                return Err("upstream exploded".to_string());
            }
            Ok(json!({"server": server, "tool": tool, "args": args}))
        }
    }

    fn pool() -> SandboxPool {
        SandboxPool::new(SandboxConfig::default(), Arc::new(EchoCaller))
    }

    fn request(code: &str, input: Value, options: ExecuteOptions) -> ExecuteRequest {
        ExecuteRequest {
            code: code.to_string(),
            input,
            options,
        }
    }

    fn default_options() -> ExecuteOptions {
        ExecuteOptions {
            timeout: Duration::from_secs(10),
            max_tool_calls: 0,
            allowed_servers: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expression_execution() {
        let result = pool()
            .execute(request(
                "({result: input.value * 2})",
                json!({"value": 21}),
                default_options(),
            ))
            .await;

        assert!(result.ok, "error: {:?}", result.error);
        assert_eq!(result.result, Some(json!({"result": 42})));
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_executions_are_isolated() {
        let pool = Arc::new(pool());

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                pool.execute(request(
                    "({result: input.value * 2})",
                    json!({"value": 21}),
                    default_options(),
                ))
                .await
            }));
        }

        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.ok, "error: {:?}", result.error);
            assert_eq!(result.result, Some(json!({"result": 42})));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tool_calls_recorded() {
        let code = r#"
            var first = callTool('alpha', 'echo', {n: 1});
            var second = callTool('beta', 'echo', {n: 2});
            ({first: first.server, second: second.server})
        "#;
        let result = pool()
            .execute(request(code, json!({}), default_options()))
            .await;

        assert!(result.ok, "error: {:?}", result.error);
        assert_eq!(result.result, Some(json!({"first": "alpha", "second": "beta"})));
        assert_eq!(result.tool_calls.len(), 2);
        assert!(result.tool_calls.iter().all(|call| call.success));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_budget_violation_surfaces_code() {
        let mut options = default_options();
        options.max_tool_calls = 1;

        let code = r#"
            callTool('s', 't', {});
            callTool('s', 't', {});
        "#;
        let result = pool().execute(request(code, json!({}), options)).await;

        assert!(!result.ok);
        assert_eq!(
            result.error.unwrap().code,
            codes::TOOL_CALL_LIMIT_EXCEEDED
        );
        assert_eq!(result.tool_calls.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_allow_list_violation_surfaces_code() {
        let mut options = default_options();
        options.allowed_servers = Some(vec!["only-this".to_string()]);

        let result = pool()
            .execute(request("callTool('other', 't', {})", json!({}), options))
            .await;

        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, codes::SERVER_NOT_ALLOWED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upstream_failure_surfaces_code() {
        let result = pool()
            .execute(request(
                "callTool('failing', 't', {})",
                json!({}),
                default_options(),
            ))
            .await;

        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, codes::UPSTREAM_ERROR);
        assert_eq!(result.tool_calls.len(), 1);
        assert!(!result.tool_calls[0].success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_script_error_code() {
        let result = pool()
            .execute(request("throw new Error('bad')", json!({}), default_options()))
            .await;

        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, codes::SCRIPT_ERROR);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_envelope() {
        let mut options = default_options();
        options.timeout = Duration::from_millis(50);

        let result = pool()
            .execute(request("while (true) {}", json!({}), options))
            .await;

        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, codes::TIMEOUT);
    }
}
