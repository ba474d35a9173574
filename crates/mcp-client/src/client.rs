//! Common client contract implemented by each transport.

use std::time::Duration;

use async_trait::async_trait;
use mcp_core::{ConnectionStats, InitializeResult, Resource, ResourceContent, Tool, ToolResult};

use crate::errors::ClientError;

/// Outcome of `connect()`.
#[derive(Debug, Clone)]
pub struct ConnectionResult {
    pub success: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl ConnectionResult {
    pub fn ok(metadata: serde_json::Value) -> Self {
        Self {
            success: true,
            error: None,
            metadata,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Protocol version and capabilities retained from the last successful
/// `initialize()` call, otherwise write-only on `InitializeResult`.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
}

impl From<&InitializeResult> for ClientMetadata {
    fn from(result: &InitializeResult) -> Self {
        Self {
            protocol_version: result.protocol_version.clone(),
            capabilities: result.capabilities.clone(),
        }
    }
}

/// The capability set every transport implements, expressed as a
/// single trait so the rest of the crate can stay transport-agnostic.
#[async_trait]
pub trait McpClient: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> ConnectionResult;
    async fn disconnect(&self);
    async fn reconnect(&self) -> ConnectionResult {
        self.disconnect().await;
        self.connect().await
    }

    async fn initialize(&self) -> Result<InitializeResult, ClientError>;

    /// Metadata retained from the last successful `initialize()`. `None`
    /// before the first handshake.
    async fn get_metadata(&self) -> Option<ClientMetadata> {
        None
    }
    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError>;
    async fn list_resources(&self) -> Result<Vec<Resource>, ClientError>;
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ClientError>;
    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ClientError>;
    async fn ping(&self) -> Result<bool, ClientError>;

    async fn get_stats(&self) -> ConnectionStats;
    async fn is_connected(&self) -> bool;
}

/// Per-operation deadline applied uniformly by every transport.
/// Transports call this instead of duplicating `tokio::time`
/// bookkeeping.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: std::future::Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}

pub fn validate_common_config(
    timeout: Duration,
    retry_attempts: u32,
) -> Result<(), ClientError> {
    if timeout.is_zero() {
        return Err(ClientError::InvalidConfig(
            "timeout must be greater than zero".into(),
        ));
    }
    if retry_attempts < 1 {
        return Err(ClientError::InvalidConfig(
            "retry_attempts must be at least 1".into(),
        ));
    }
    Ok(())
}

/// `0.1 * 2^attempt` backoff used by `connect()`'s internal retry loop
/// and echoed by the router's call-level retry
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(0.1 * 2f64.powi(attempt as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_secs_f64(0.1));
        assert_eq!(backoff_delay(1), Duration::from_secs_f64(0.2));
        assert_eq!(backoff_delay(2), Duration::from_secs_f64(0.4));
    }

    #[tokio::test]
    async fn with_timeout_surfaces_timeout_error() {
        let result: Result<(), ClientError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(validate_common_config(Duration::ZERO, 3).is_err());
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        assert!(validate_common_config(Duration::from_secs(1), 0).is_err());
    }
}
