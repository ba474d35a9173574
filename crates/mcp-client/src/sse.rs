//! SSE transport: a GET event stream paired with a POST channel for
//! requests, discovered via an `event: endpoint` message

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use mcp_core::config::SseConfig;
use mcp_core::{
    ConnectionState, ConnectionStats, InitializeResult, Resource, ResourceContent, Tool,
    ToolResult,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::client::{
    validate_common_config, with_timeout, ClientMetadata, ConnectionResult, McpClient,
};
use crate::errors::ClientError;
use crate::pending::PendingRequests;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ResourcesListResult, ToolsListResult};

/// How long `call_tool`/`list_*`/etc. will wait for the `endpoint` event
/// to arrive before giving up
const ENDPOINT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One parsed `event:`/`data:`/`id:`/`retry:` block, terminated by a blank
/// line. Multiple `data:` lines are joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental line-oriented SSE parser; feed it raw byte chunks as they
/// arrive off the wire and it yields complete events.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    event: String,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let raw_line: String = self.buffer.drain(..=pos).collect();
            let line = raw_line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if !self.event.is_empty() || !self.data.is_empty() {
                    out.push(SseEvent {
                        event: if self.event.is_empty() {
                            "message".to_string()
                        } else {
                            self.event.clone()
                        },
                        data: self.data.join("\n"),
                        id: self.id.clone(),
                    });
                }
                self.event.clear();
                self.data.clear();
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("event:") {
                self.event = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("id:") {
                self.id = Some(rest.trim().to_string());
            }
            // `retry:` is accepted on the wire but this client does not
            // currently act on server-suggested reconnect intervals.
        }
        out
    }
}

struct StreamHandle {
    task: JoinHandle<()>,
}

/// SSE-backed MCP client.
pub struct SseClient {
    name: String,
    config: SseConfig,
    http: reqwest::Client,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    state: Arc<Mutex<ConnectionState>>,
    stats: Arc<Mutex<ConnectionStats>>,
    pending: PendingRequests,
    post_endpoint: Arc<Mutex<Option<String>>>,
    endpoint_ready: Arc<Notify>,
    stream: Arc<Mutex<Option<StreamHandle>>>,
    metadata: Arc<Mutex<Option<ClientMetadata>>>,
}

impl SseClient {
    pub fn new(
        name: impl Into<String>,
        config: SseConfig,
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, ClientError> {
        validate_common_config(timeout, retry_attempts)?;
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "invalid SSE URL: {}",
                config.url
            )));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            config,
            http,
            timeout,
            retry_attempts,
            retry_delay,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            pending: PendingRequests::new(),
            post_endpoint: Arc::new(Mutex::new(None)),
            endpoint_ready: Arc::new(Notify::new()),
            stream: Arc::new(Mutex::new(None)),
            metadata: Arc::new(Mutex::new(None)),
        })
    }

    fn resolve_post_url(&self, path: &str) -> String {
        match reqwest::Url::parse(&self.config.url).and_then(|base| base.join(path)) {
            Ok(url) => url.to_string(),
            Err(_) => path.to_string(),
        }
    }

    async fn open_stream(&self) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream");
        for (k, v) in &self.config.headers {
            request = request.header(k, v);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if status.as_u16() != 200 {
            return Err(ClientError::Connection(format!(
                "SSE handshake failed: HTTP {status}"
            )));
        }
        if !content_type.contains("text/event-stream") {
            return Err(ClientError::Protocol(format!(
                "expected text/event-stream, got '{content_type}'"
            )));
        }
        Ok(response)
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let wait = self.endpoint_ready.notified();
        if self.post_endpoint.lock().await.is_none() {
            match tokio::time::timeout(ENDPOINT_DISCOVERY_TIMEOUT, wait).await {
                Ok(()) => {}
                Err(_) => {
                    return Err(ClientError::Timeout(ENDPOINT_DISCOVERY_TIMEOUT));
                }
            }
        }
        let endpoint = self
            .post_endpoint
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::Connection("no SSE endpoint discovered".into()))?;
        let post_url = self.resolve_post_url(&endpoint);

        let (id, rx) = self.pending.register().await;
        let request = JsonRpcRequest::new(id, method, params);

        let http = self.http.clone();
        let started = Instant::now();
        let outcome = with_timeout(self.timeout, async {
            let response = http
                .post(&post_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))?;
            let status = response.status().as_u16();
            if status != 200 && status != 204 {
                return Err(ClientError::Connection(format!(
                    "POST to SSE endpoint failed: HTTP {status}"
                )));
            }
            rx.await.map_err(|_| {
                ClientError::Connection("SSE stream closed while awaiting response".into())
            })
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
            Err(_) => self.stats.lock().await.record_error(),
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
}

#[async_trait]
impl McpClient for SseClient {
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
        let mut response = None;
        for attempt in 0..self.retry_attempts {
            match self.open_stream().await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        let Some(response) = response else {
            *self.state.lock().await = ConnectionState::Error;
            return ConnectionResult::failed(last_error);
        };

        let pending = self.pending.clone();
        let post_endpoint = self.post_endpoint.clone();
        let endpoint_ready = self.endpoint_ready.clone();
        let stats = self.stats.clone();
        let state_for_stream = self.state.clone();

        let task = tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(bytes) = chunk else {
                    *state_for_stream.lock().await = ConnectionState::Error;
                    pending.fail_all().await;
                    return;
                };
                let text = String::from_utf8_lossy(&bytes);
                for event in parser.feed(&text) {
                    match event.event.as_str() {
                        "endpoint" => {
                            *post_endpoint.lock().await = Some(event.data.trim().to_string());
                            endpoint_ready.notify_waiters();
                        }
                        "message" => {
                            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&event.data)
                            {
                                pending.resolve(resp).await;
                            }
                        }
                        "ping" => {
                            stats.lock().await.last_activity = Some(chrono::Utc::now());
                        }
                        "error" => {
                            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&event.data)
                            {
                                pending.resolve(resp).await;
                            } else {
                                *state_for_stream.lock().await = ConnectionState::Error;
                                pending.fail_all().await;
                            }
                        }
                        _ => {}
                    }
                }
            }
            *state_for_stream.lock().await = ConnectionState::Error;
            pending.fail_all().await;
        });

        *self.stream.lock().await = Some(StreamHandle { task });
        *self.state.lock().await = ConnectionState::Connected;
        self.stats.lock().await.mark_connected();
        ConnectionResult::ok(serde_json::json!({"transport": "sse"}))
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.stream.lock().await.take() {
            handle.task.abort();
        }
        *self.post_endpoint.lock().await = None;
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

    #[test]
    fn parses_endpoint_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: endpoint\ndata: /messages?session_id=abc123\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?session_id=abc123");
    }

    #[test]
    fn joins_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\ndata: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(": heartbeat\nevent: ping\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "ping");
    }

    #[test]
    fn untyped_event_defaults_to_message() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn handles_split_chunks_across_feeds() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: endpo").is_empty());
        let events = parser.feed("int\ndata: /x\n\n");
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/x");
    }

    #[test]
    fn rejects_non_http_url() {
        let err = SseClient::new(
            "s",
            SseConfig {
                url: "ftp://example.com".into(),
                headers: Default::default(),
                heartbeat_interval: 30,
            },
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }
}
