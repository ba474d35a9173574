//! Config schema This module defines the shapes a host
//! application parses a config file into; reading the file itself is out
//! of scope (Non-goals) — see [`crate::interpolation`] for the one
//! piece of that pipeline this crate does own, `${VAR}` substitution.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ConfigError;

const DEFAULT_PRIORITY: u8 = 50;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Top-level aggregator config
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    pub version: String,
    #[serde(default)]
    pub metadata: Option<ConfigMetadata>,
    #[serde(default)]
    pub defaults: Option<Defaults>,
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub routing_rules: HashMap<String, RoutingRule>,
}

impl AggregatorConfig {
    /// Validates uniqueness of server names and that at least one server
    /// is configured. Per-server field validation happens in
    /// [`ServerConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServerName(server.name.clone()));
            }
            server.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigMetadata {
    pub description: Option<String>,
    pub created: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    pub timeout: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingRule {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub required_servers: Vec<String>,
    pub intent_type: String,
    #[serde(default)]
    pub execution_order: Option<Vec<String>>,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
}

/// One backend's configuration. `name` must be kebab-case and unique
/// within a config.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub name: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub transport: TransportConfig,
    pub priority: u8,
    pub critical: bool,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_kebab_case(&self.name) {
            return Err(ConfigError::InvalidServer {
                name: self.name.clone(),
                reason: "name must be kebab-case".into(),
            });
        }
        if !(1..=100).contains(&self.priority) {
            return Err(ConfigError::InvalidServer {
                name: self.name.clone(),
                reason: "priority must be between 1 and 100".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidServer {
                name: self.name.clone(),
                reason: "timeout must be greater than zero".into(),
            });
        }
        if self.retry_attempts < 1 {
            return Err(ConfigError::InvalidServer {
                name: self.name.clone(),
                reason: "retry_attempts must be at least 1".into(),
            });
        }
        self.transport.validate(&self.name)
    }
}

fn is_kebab_case(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Transport-specific configuration, tagged by `transport` in the outer
/// JSON object with the variant's fields nested under `config`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "transport", content = "config", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Sse(SseConfig),
    Http(HttpConfig),
}

impl TransportConfig {
    fn validate(&self, server_name: &str) -> Result<(), ConfigError> {
        match self {
            Self::Stdio(c) => {
                if c.command.is_empty() {
                    return Err(ConfigError::InvalidServer {
                        name: server_name.into(),
                        reason: "stdio transport requires 'command'".into(),
                    });
                }
                if c.buffer_size == 0 {
                    return Err(ConfigError::InvalidServer {
                        name: server_name.into(),
                        reason: "buffer_size must be greater than zero".into(),
                    });
                }
            }
            Self::Sse(c) => {
                validate_url(server_name, &c.url)?;
            }
            Self::Http(c) => {
                validate_url(server_name, &c.base_url)?;
                if c.connection_pool_size == 0 {
                    return Err(ConfigError::InvalidServer {
                        name: server_name.into(),
                        reason: "connection_pool_size must be greater than zero".into(),
                    });
                }
                if let Some(rl) = &c.rate_limit {
                    if rl.requests_per_second <= 0.0 {
                        return Err(ConfigError::InvalidServer {
                            name: server_name.into(),
                            reason: "rate_limit.requests_per_second must be positive".into(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Sse(_) => "sse",
            Self::Http(_) => "http",
        }
    }
}

fn validate_url(server_name: &str, url: &str) -> Result<(), ConfigError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidServer {
            name: server_name.into(),
            reason: format!("invalid URL: {url}"),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SseConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
}

fn default_pool_size() -> usize {
    10
}

fn default_keep_alive() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimit {
    pub requests_per_second: f64,
}

/// Raw wire shape used only for `Deserialize`; lets `timeout`/`retry_*`
/// fall back to `defaults` from the surrounding `AggregatorConfig` the way
/// the original loader does, while still producing a self-contained
/// [`ServerConfig`].
#[derive(Deserialize)]
struct RawServerConfig {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    description: Option<String>,
    transport: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    critical: bool,
    timeout: Option<u64>,
    retry_attempts: Option<u32>,
    retry_delay: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawServerConfig::deserialize(deserializer)?;

        let transport = match raw.transport.as_str() {
            "stdio" => TransportConfig::Stdio(
                serde_json::from_value(raw.config).map_err(serde::de::Error::custom)?,
            ),
            "sse" => TransportConfig::Sse(
                serde_json::from_value(raw.config).map_err(serde::de::Error::custom)?,
            ),
            "http" => TransportConfig::Http(
                serde_json::from_value(raw.config).map_err(serde::de::Error::custom)?,
            ),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "server '{}': unknown transport '{other}' (expected stdio, sse, or http)",
                    raw.name
                )));
            }
        };

        Ok(ServerConfig {
            name: raw.name,
            enabled: raw.enabled,
            description: raw.description,
            transport,
            priority: raw.priority,
            critical: raw.critical,
            timeout: Duration::from_millis(raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
            retry_attempts: raw.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            retry_delay: Duration::from_millis(raw.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_server() {
        let json = serde_json::json!({
            "name": "db-tools",
            "transport": "stdio",
            "config": {"command": "npx", "args": ["-y", "db-mcp"]}
        });
        let server: ServerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(server.priority, DEFAULT_PRIORITY);
        assert!(matches!(server.transport, TransportConfig::Stdio(_)));
        server.validate().unwrap();
    }

    #[test]
    fn rejects_non_kebab_case_name() {
        let json = serde_json::json!({
            "name": "DB_Tools",
            "transport": "stdio",
            "config": {"command": "npx"}
        });
        let server: ServerConfig = serde_json::from_value(json).unwrap();
        assert!(server.validate().is_err());
    }

    #[test]
    fn rejects_unknown_transport() {
        let json = serde_json::json!({
            "name": "db-tools",
            "transport": "carrier-pigeon",
            "config": {}
        });
        let err = serde_json::from_value::<ServerConfig>(json).unwrap_err();
        assert!(err.to_string().contains("unknown transport"));
    }

    #[test]
    fn http_requires_http_or_https_base_url() {
        let json = serde_json::json!({
            "name": "db-tools",
            "transport": "http",
            "config": {"base_url": "ftp://example.com"}
        });
        let server: ServerConfig = serde_json::from_value(json).unwrap();
        assert!(server.validate().is_err());
    }

    #[test]
    fn aggregator_config_rejects_duplicate_names() {
        let json = serde_json::json!({
            "version": "1.0.0",
            "servers": [
                {"name": "db", "transport": "stdio", "config": {"command": "npx"}},
                {"name": "db", "transport": "stdio", "config": {"command": "npx"}}
            ]
        });
        let config: AggregatorConfig = serde_json::from_value(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateServerName(_))
        ));
    }
}
