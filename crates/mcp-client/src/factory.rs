//! Builds the right transport implementation for a [`ServerConfig`]
//! (; grounded on the source's `client_factory.py` dispatch).

use std::sync::Arc;

use mcp_core::config::TransportConfig;
use mcp_core::ServerConfig;

use crate::client::McpClient;
use crate::errors::ClientError;
use crate::http::HttpClient;
use crate::sse::SseClient;
use crate::stdio::StdioClient;

pub fn build_client(config: &ServerConfig) -> Result<Arc<dyn McpClient>, ClientError> {
    let client: Arc<dyn McpClient> = match &config.transport {
        TransportConfig::Stdio(stdio) => Arc::new(StdioClient::new(
            &config.name,
            stdio.clone(),
            config.timeout,
            config.retry_attempts,
            config.retry_delay,
        )?),
        TransportConfig::Sse(sse) => Arc::new(SseClient::new(
            &config.name,
            sse.clone(),
            config.timeout,
            config.retry_attempts,
            config.retry_delay,
        )?),
        TransportConfig::Http(http) => Arc::new(HttpClient::new(
            &config.name,
            http.clone(),
            config.timeout,
            config.retry_attempts,
            config.retry_delay,
        )?),
    };
    Ok(client)
}
