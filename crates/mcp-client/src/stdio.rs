//! stdio transport: spawns the configured command, speaks line-delimited
//! JSON-RPC over its stdin/stdout

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mcp_core::config::StdioConfig;
use mcp_core::{
    ConnectionState, ConnectionStats, InitializeResult, Resource, ResourceContent, Tool,
    ToolResult,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::client::{
    backoff_delay, validate_common_config, with_timeout, ClientMetadata, ConnectionResult, McpClient,
};
use crate::errors::ClientError;
use crate::pending::PendingRequests;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ResourcesListResult, ToolsListResult};

const STDERR_RING_CAPACITY: usize = 200;

struct RunningProcess {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stderr_ring: Arc<Mutex<VecDeque<String>>>,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

/// Subprocess-backed MCP client.
pub struct StdioClient {
    name: String,
    config: StdioConfig,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    state: Arc<Mutex<ConnectionState>>,
    stats: Arc<Mutex<ConnectionStats>>,
    pending: PendingRequests,
    running: Arc<Mutex<Option<RunningProcess>>>,
    metadata: Arc<Mutex<Option<ClientMetadata>>>,
}

impl StdioClient {
    pub fn new(
        name: impl Into<String>,
        config: StdioConfig,
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, ClientError> {
        validate_common_config(timeout, retry_attempts)?;
        if config.command.is_empty() {
            return Err(ClientError::InvalidConfig(
                "stdio transport requires a non-empty command".into(),
            ));
        }
        if let Some(cwd) = &config.cwd {
            if !std::path::Path::new(cwd).exists() {
                return Err(ClientError::InvalidConfig(format!(
                    "cwd '{cwd}' does not exist"
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            config,
            timeout,
            retry_attempts,
            retry_delay,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            pending: PendingRequests::new(),
            running: Arc::new(Mutex::new(None)),
            metadata: Arc::new(Mutex::new(None)),
        })
    }

    async fn spawn_once(&self) -> Result<RunningProcess, ClientError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ClientError::Connection(format!("failed to spawn `{}`: {e}", self.config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Connection("no stdin handle on child process".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Connection("no stdout handle on child process".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::Connection("no stderr handle on child process".into()))?;

        let pending = self.pending.clone();
        let mut stdout_lines = BufReader::new(stdout).lines();
        let reader_task = tokio::spawn(async move {
            while let Ok(Some(line)) = stdout_lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => pending.resolve(response).await,
                    Err(e) => tracing::warn!("malformed JSON-RPC line from child: {e}"),
                }
            }
        });

        let stderr_ring = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)));
        let ring_clone = stderr_ring.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut ring = ring_clone.lock().await;
                if ring.len() == STDERR_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
        });

        let state = self.state.clone();
        let pending_for_monitor = self.pending.clone();
        let child = Arc::new(Mutex::new(child));
        let child_for_monitor = child.clone();
        let monitor_task = tokio::spawn(async move {
            let status = child_for_monitor.lock().await.wait().await;
            match status {
                Ok(status) if !status.success() => {
                    tracing::warn!("MCP child process exited with {status}");
                }
                Err(e) => tracing::warn!("error waiting on MCP child process: {e}"),
                _ => {}
            }
            *state.lock().await = ConnectionState::Error;
            pending_for_monitor.fail_all().await;
        });

        Ok(RunningProcess {
            child,
            stdin,
            stderr_ring,
            reader_task,
            stderr_task,
            monitor_task,
        })
    }

    async fn send_line(&self, request: &JsonRpcRequest) -> Result<(), ClientError> {
        let line = request
            .to_line()
            .map_err(|e| ClientError::Protocol(format!("failed to serialize request: {e}")))?;
        if line.len() > self.config.buffer_size {
            return Err(ClientError::Protocol(format!(
                "request of {} bytes exceeds buffer_size {}",
                line.len(),
                self.config.buffer_size
            )));
        }
        let mut running = self.running.lock().await;
        let Some(proc) = running.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        proc.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClientError::Connection(format!("write to stdin failed: {e}")))?;
        proc.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ClientError::Connection(format!("write to stdin failed: {e}")))?;
        proc.stdin
            .flush()
            .await
            .map_err(|e| ClientError::Connection(format!("flush stdin failed: {e}")))?;
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }
        let (id, rx) = self.pending.register().await;
        let request = JsonRpcRequest::new(id, method, params);

        let started = Instant::now();
        let outcome = with_timeout(self.timeout, async {
            self.send_line(&request).await?;
            rx.await
                .map_err(|_| ClientError::Connection("connection closed while awaiting response".into()))
        })
        .await;

        match &outcome {
            Ok(_) => {
                self.stats
                    .lock()
                    .await
                    .record_success(started.elapsed());
            }
            Err(ClientError::Timeout(_)) => {
                self.pending.purge(id).await;
                self.stats.lock().await.record_error();
            }
            Err(_) => {
                self.stats.lock().await.record_error();
            }
        }

        let response = outcome?;
        if let Some(error) = response.error {
            return Err(ClientError::Protocol(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    pub async fn stderr_tail(&self) -> Vec<String> {
        match self.running.lock().await.as_ref() {
            Some(proc) => proc.stderr_ring.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl McpClient for StdioClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ConnectionResult {
        {
            let mut state = self.state.lock().await;
            if *state == ConnectionState::Connected {
                return ConnectionResult::ok(serde_json::json!({"already_connected": true}));
            }
            *state = ConnectionState::Initializing;
        }

        let mut last_error = String::new();
        for attempt in 0..self.retry_attempts {
            match self.spawn_once().await {
                Ok(proc) => {
                    *self.running.lock().await = Some(proc);
                    *self.state.lock().await = ConnectionState::Connected;
                    self.stats.lock().await.mark_connected();
                    return ConnectionResult::ok(serde_json::json!({"transport": "stdio"}));
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(backoff_delay(attempt) + self.retry_delay / 2).await;
                    }
                }
            }
        }
        *self.state.lock().await = ConnectionState::Error;
        ConnectionResult::failed(last_error)
    }

    async fn disconnect(&self) {
        let mut running = self.running.lock().await;
        if let Some(proc) = running.take() {
            let mut child = proc.child.lock().await;
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            let shutdown_timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
            if tokio::time::timeout(shutdown_timeout, child.wait())
                .await
                .is_err()
            {
                let _ = child.kill().await;
            }
            drop(child);
            proc.reader_task.abort();
            proc.stderr_task.abort();
            proc.monitor_task.abort();
        }
        self.pending.fail_all().await;
        *self.state.lock().await = ConnectionState::Disconnected;
    }

    async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        let result = self
            .call(
                "initialize",
                serde_json::json!({
                    "protocolVersion": crate::protocol::MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                }),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed initialize result: {e}")))?;
        *self.metadata.lock().await = Some(ClientMetadata::from(&result));
        Ok(result)
    }

    async fn get_metadata(&self) -> Option<ClientMetadata> {
        self.metadata.lock().await.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let result = self.call("tools/list", serde_json::json!({})).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, ClientError> {
        let result = self.call("resources/list", serde_json::json!({})).await?;
        let parsed: ResourcesListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed resources/list result: {e}")))?;
        Ok(parsed.resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        let result = self
            .call(
                "tools/call",
                serde_json::json!({"name": name, "arguments": args}),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed tools/call result: {e}")))
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ClientError> {
        let result = self
            .call("resources/read", serde_json::json!({"uri": uri}))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed resources/read result: {e}")))
    }

    async fn ping(&self) -> Result<bool, ClientError> {
        match self.call("ping", serde_json::json!({})).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotConnected) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_stats(&self) -> ConnectionStats {
        self.stats.lock().await.clone()
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.is_operational()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_config() -> StdioConfig {
        StdioConfig {
            command: "cat".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
            buffer_size: 1024 * 1024,
            shutdown_timeout_ms: 1000,
        }
    }

    #[test]
    fn rejects_empty_command() {
        let mut config = echo_config();
        config.command = String::new();
        let result = StdioClient::new("x", config, Duration::from_secs(1), 1, Duration::from_millis(1));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_cwd() {
        let mut config = echo_config();
        config.cwd = Some("/definitely/does/not/exist/anywhere".into());
        let result = StdioClient::new("x", config, Duration::from_secs(1), 1, Duration::from_millis(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disconnected_client_starts_not_connected() {
        let client = StdioClient::new(
            "x",
            echo_config(),
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
        )
        .unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn call_before_connect_is_not_connected_error() {
        let client = StdioClient::new(
            "x",
            echo_config(),
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
        )
        .unwrap();
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }
}
