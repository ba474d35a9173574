//! Core MCP data types: tools, resources, results, and connection state.
//!
//! These mirror the wire-level shapes consumed from backends;
//! this crate does not define the MCP protocol itself, only the values
//! that cross the client boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named, schema-described operation a backend exposes. Immutable once
/// fetched from a backend's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub parameters: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({})
}

/// A named, URI-addressed readable blob a backend exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// The content fetched for a `Resource`, as returned by `read_resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    pub uri: String,
    pub content: ResourceBody,
}

/// Resource bodies are either text or raw bytes (base64 on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceBody {
    Text(String),
    Blob(Vec<u8>),
}

impl ResourceBody {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Blob(_) => None,
        }
    }
}

/// Result of a tool invocation. `is_error` distinguishes an MCP-level
/// error result (the backend ran and reported failure) from a transport
/// failure, which instead surfaces as a `ClientError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Result of the MCP handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

/// Connection lifecycle state machine
///
/// `DISCONNECTED → INITIALIZING → CONNECTED → {ERROR, RECONNECTING,
/// DISCONNECTED}`. Only `Connected` permits operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Initializing,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Rolling connection statistics, mutated by the client on every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub requests_sent: u64,
    pub errors_count: u64,
    pub average_latency: Duration,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            connected_at: None,
            last_activity: None,
            requests_sent: 0,
            errors_count: 0,
            average_latency: Duration::ZERO,
        }
    }
}

impl ConnectionStats {
    /// Records a successful operation, updating the rolling average
    /// latency with a simple cumulative mean: no decay, every sample
    /// carries equal weight.
    pub fn record_success(&mut self, latency: Duration) {
        self.requests_sent += 1;
        self.last_activity = Some(Utc::now());
        let n = self.requests_sent as u32;
        let prev_total = self.average_latency.as_secs_f64() * (n - 1) as f64;
        let new_avg = (prev_total + latency.as_secs_f64()) / n as f64;
        self.average_latency = Duration::from_secs_f64(new_avg.max(0.0));
    }

    pub fn record_error(&mut self) {
        self.requests_sent += 1;
        self.errors_count += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Utc::now());
        self.last_activity = self.connected_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_latency_is_cumulative_mean() {
        let mut stats = ConnectionStats::default();
        stats.record_success(Duration::from_millis(100));
        stats.record_success(Duration::from_millis(200));
        assert_eq!(stats.requests_sent, 2);
        assert_eq!(stats.average_latency, Duration::from_millis(150));
    }

    #[test]
    fn error_increments_counters_without_latency() {
        let mut stats = ConnectionStats::default();
        stats.record_error();
        assert_eq!(stats.errors_count, 1);
        assert_eq!(stats.requests_sent, 1);
    }

    #[test]
    fn connection_state_operational_only_when_connected() {
        assert!(ConnectionState::Connected.is_operational());
        assert!(!ConnectionState::Error.is_operational());
        assert!(!ConnectionState::Disconnected.is_operational());
    }
}
