//! Plain HTTP/JSON transport: `GET /health`, `GET /tools`,
//! `POST /tools/execute`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mcp_core::config::HttpConfig;
use mcp_core::{
    ConnectionState, ConnectionStats, InitializeResult, Resource, ResourceContent, Tool,
    ToolResult,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Mutex;

use crate::client::{
    backoff_delay, validate_common_config, with_timeout, ClientMetadata, ConnectionResult, McpClient,
};
use crate::errors::ClientError;

/// Minimal HTTP transport state; no request-id correlation is needed —
/// every call is a synchronous request/response round trip.
pub struct HttpClient {
    name: String,
    config: HttpConfig,
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    state: Arc<Mutex<ConnectionState>>,
    stats: Arc<Mutex<ConnectionStats>>,
    next_allowed_request_at: Arc<Mutex<Instant>>,
    min_interval: Option<Duration>,
    metadata: Arc<Mutex<Option<ClientMetadata>>>,
}

impl HttpClient {
    pub fn new(
        name: impl Into<String>,
        config: HttpConfig,
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, ClientError> {
        validate_common_config(timeout, retry_attempts)?;
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "invalid base_url: {}",
                config.base_url
            )));
        }
        if config.connection_pool_size == 0 {
            return Err(ClientError::InvalidConfig(
                "connection_pool_size must be greater than zero".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        for (k, v) in &config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(config.connection_pool_size)
            .pool_idle_timeout(if config.keep_alive {
                Some(Duration::from_secs(90))
            } else {
                Some(Duration::from_secs(0))
            })
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        let min_interval = config
            .rate_limit
            .as_ref()
            .filter(|rl| rl.requests_per_second > 0.0)
            .map(|rl| Duration::from_secs_f64(1.0 / rl.requests_per_second));

        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            name: name.into(),
            config,
            base_url,
            http,
            timeout,
            retry_attempts,
            retry_delay,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            next_allowed_request_at: Arc::new(Mutex::new(Instant::now())),
            min_interval,
            metadata: Arc::new(Mutex::new(None)),
        })
    }

    async fn throttle(&self) {
        let Some(min_interval) = self.min_interval else {
            return;
        };
        let mut next_allowed = self.next_allowed_request_at.lock().await;
        let now = Instant::now();
        if *next_allowed > now {
            tokio::time::sleep(*next_allowed - now).await;
        }
        *next_allowed = Instant::now() + min_interval;
    }

    /// Issues one request, honoring `Retry-After` on a single 429 retry
    /// Extra per-call headers are merged without mutating
    /// the client's base headers.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..2 {
            self.throttle().await;
            let mut request = self.http.request(method.clone(), &url);
            if let Some(extra) = extra_headers {
                request = request.headers(extra.clone());
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = with_timeout(self.timeout, async move {
                request
                    .send()
                    .await
                    .map_err(|e| ClientError::Connection(e.to_string()))
            })
            .await?;

            if response.status().as_u16() == 429 && attempt == 0 {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }
            if response.status().as_u16() == 401 {
                return Err(ClientError::Connection(format!(
                    "authentication failed: HTTP 401 ({path})"
                )));
            }
            return Ok(response);
        }
        unreachable!("loop always returns within two attempts")
    }

    async fn call_tool_inner(
        &self,
        name: &str,
        args: serde_json::Value,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<ToolResult, ClientError> {
        let response = self
            .request(
                reqwest::Method::POST,
                "/tools/execute",
                Some(serde_json::json!({"tool": name, "arguments": args})),
                extra_headers,
            )
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Protocol(format!(
                "tools/execute failed: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("malformed tool result: {e}")))
    }
}

#[async_trait]
impl McpClient for HttpClient {
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
            match self.request(reqwest::Method::GET, "/health", None, None).await {
                Ok(response) if response.status().is_success() => {
                    *self.state.lock().await = ConnectionState::Connected;
                    self.stats.lock().await.mark_connected();
                    return ConnectionResult::ok(serde_json::json!({"transport": "http"}));
                }
                Ok(response) => {
                    last_error = format!("health check failed: HTTP {}", response.status());
                    if last_error.contains("401") {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt + 1 < self.retry_attempts {
                tokio::time::sleep(backoff_delay(attempt) + self.retry_delay / 2).await;
            }
        }
        *self.state.lock().await = ConnectionState::Error;
        ConnectionResult::failed(last_error)
    }

    async fn disconnect(&self) {
        *self.state.lock().await = ConnectionState::Disconnected;
    }

    async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/health", None, None)
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Protocol(format!(
                "health check failed: HTTP {}",
                response.status()
            )));
        }
        let result = InitializeResult {
            protocol_version: crate::protocol::MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
        };
        *self.metadata.lock().await = Some(ClientMetadata::from(&result));
        Ok(result)
    }

    async fn get_metadata(&self) -> Option<ClientMetadata> {
        self.metadata.lock().await.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/tools", None, None)
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Protocol(format!(
                "GET /tools failed: HTTP {}",
                response.status()
            )));
        }
        #[derive(serde::Deserialize)]
        struct ToolsResponse {
            tools: Vec<Tool>,
        }
        let parsed: ToolsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("malformed /tools response: {e}")))?;
        Ok(parsed.tools)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/resources", None, None)
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Protocol(format!(
                "GET /resources failed: HTTP {}",
                response.status()
            )));
        }
        #[derive(serde::Deserialize)]
        struct ResourcesResponse {
            resources: Vec<Resource>,
        }
        let parsed: ResourcesResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("malformed /resources response: {e}")))?;
        Ok(parsed.resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ClientError> {
        self.call_tool_inner(name, args, None).await
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ClientError> {
        let response = self
            .request(
                reqwest::Method::POST,
                "/resources/read",
                Some(serde_json::json!({"uri": uri})),
                None,
            )
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Protocol(format!(
                "resources/read failed: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("malformed resource content: {e}")))
    }

    async fn ping(&self) -> Result<bool, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/health", None, None)
            .await?;
        Ok(response.status().is_success())
    }

    async fn get_stats(&self) -> ConnectionStats {
        self.stats.lock().await.clone()
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.is_operational()
    }
}
