//! Standard I/O transport for subprocess MCP servers

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::UpstreamTransport;
use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::stderr::StderrRing;

/// Stdio transport: one subprocess speaking line-delimited JSON-RPC.
///
/// The child's stderr is drained line-wise into the shared [`StderrRing`]
/// so `tail_log` can surface it after the process dies.
pub struct StdioTransport {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Environment variables
    env: BTreeMap<String, String>,

    /// Child process handle
    child: Option<Child>,

    /// Stdin writer
    stdin: Option<BufWriter<ChildStdin>>,

    /// Stdout reader
    stdout: Option<BufReader<ChildStdout>>,

    /// Shared stderr ring for diagnostics
    stderr: Arc<StderrRing>,

    /// Whether the transport is connected
    connected: bool,
}

impl StdioTransport {
    pub fn new(
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        stderr: Arc<StderrRing>,
    ) -> McpResult<Self> {
        if command.trim().is_empty() {
            return Err(McpError::Configuration {
                message: "Command cannot be empty".to_string(),
            });
        }

        Ok(Self {
            command,
            args,
            env,
            child: None,
            stdin: None,
            stdout: None,
            stderr,
            connected: false,
        })
    }

    async fn spawn_process(&mut self) -> McpResult<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&self.env)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::ConnectionFailed {
            message: format!("Failed to spawn process '{}': {}", self.command, e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            McpError::transport("Failed to get stdin handle")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::transport("Failed to get stdout handle")
        })?;
        let child_stderr = child.stderr.take().ok_or_else(|| {
            McpError::transport("Failed to get stderr handle")
        })?;

        // Drain stderr into the ring until the child exits
        let ring = self.stderr.clone();
        let command = self.command.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(child_stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(command = %command, "upstream stderr: {}", line);
                ring.push(line);
            }
        });

        self.stdin = Some(BufWriter::new(stdin));
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);

        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> McpResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::transport("Transport not connected"))?;

        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::transport(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::transport(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("Failed to flush stdin: {}", e)))?;

        Ok(())
    }

    async fn read_line(&mut self) -> McpResult<String> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::transport("Transport not connected"))?;

        let mut line = String::new();
        let bytes_read = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| McpError::transport(format!("Failed to read from stdout: {}", e)))?;

        if bytes_read == 0 {
            return Err(McpError::ConnectionFailed {
                message: "Process closed stdout".to_string(),
            });
        }

        Ok(line.trim_end().to_string())
    }

    fn is_process_running(&mut self) -> bool {
        if let Some(child) = &mut self.child {
            child.try_wait().map_or(true, |status| status.is_none())
        } else {
            false
        }
    }
}

#[async_trait]
impl UpstreamTransport for StdioTransport {
    async fn connect(&mut self) -> McpResult<()> {
        if self.connected {
            return Ok(());
        }

        self.spawn_process().await?;
        self.connected = true;
        Ok(())
    }

    async fn request(&mut self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }
        if !self.is_process_running() {
            self.connected = false;
            return Err(McpError::ConnectionFailed {
                message: "Child process has terminated".to_string(),
            });
        }

        let want_id = request.id.clone();
        let json = serde_json::to_string(&request)?;
        if let Err(e) = self.write_line(&json).await {
            self.connected = false;
            return Err(e);
        }

        // Read lines until the response with our id shows up. Server-sent
        // requests and notifications are skipped; the proxy does not act as
        // an MCP server towards its upstreams.
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(e) => {
                    self.connected = false;
                    return Err(e);
                }
            };

            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(&line) {
                Ok(response) if response.id == want_id => return Ok(response),
                Ok(response) => {
                    tracing::debug!(
                        "skipping out-of-band message with id {:?}",
                        response.id
                    );
                }
                Err(_) => {
                    tracing::debug!("skipping non-response line from upstream");
                }
            }
        }
    }

    async fn notify(&mut self, notification: JsonRpcRequest) -> McpResult<()> {
        if !self.connected {
            return Err(McpError::transport("Transport not connected"));
        }

        let json = serde_json::to_string(&notification)?;
        self.write_line(&json).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> McpResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill child process: {}", e);
                    }
                    let _ = child.wait().await;
                }
                Err(e) => {
                    tracing::warn!("Error checking child process status: {}", e);
                }
            }
        }

        self.stdout = None;
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
