//! Thread-safe registry of server instances, keyed by unique name
//!

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use mcp_client::McpClient;
use mcp_core::{ConnectionState, ConnectionStats, Resource, ServerConfig, Tool};
use tokio::sync::RwLock;

use crate::errors::RegistryError;
use crate::events::{EventBus, EventHandler, ServerEvent};

/// One registered backend, owned exclusively by the registry.
#[derive(Clone)]
pub struct ServerInstance {
    pub name: String,
    pub client: Arc<dyn McpClient>,
    pub config: ServerConfig,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub state: ConnectionState,
    pub stats: ConnectionStats,
    pub consecutive_failures: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ServerInstance {
    pub fn is_available(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub errored: usize,
    pub critical_down: usize,
    pub total_requests: u64,
    pub total_errors: u64,
}

/// A `(name, config)` pair, the unit `save_state`/`load_state` round-trip.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct SavedServer {
    pub name: String,
    pub config: ServerConfig,
}

pub struct ServerRegistry {
    servers: RwLock<HashMap<String, ServerInstance>>,
    events: EventBus,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub async fn subscribe(&self, handler: EventHandler) {
        self.events.subscribe(handler).await;
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        client: Arc<dyn McpClient>,
        config: ServerConfig,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&name) {
                return Err(RegistryError::AlreadyRegistered(name));
            }
            let state = if client.is_connected().await {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            servers.insert(
                name.clone(),
                ServerInstance {
                    name: name.clone(),
                    client,
                    config,
                    tools: Vec::new(),
                    resources: Vec::new(),
                    state,
                    stats: ConnectionStats::default(),
                    consecutive_failures: 0,
                    last_seen: None,
                },
            );
        }
        self.events
            .publish(ServerEvent::ServerRegistered { name })
            .await;
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let instance = {
            let mut servers = self.servers.write().await;
            servers
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
        };
        instance.client.disconnect().await;
        self.events
            .publish(ServerEvent::ServerUnregistered {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn get_server(&self, name: &str) -> Option<ServerInstance> {
        self.servers.read().await.get(name).cloned()
    }

    pub async fn get_all_servers(&self) -> Vec<ServerInstance> {
        self.servers.read().await.values().cloned().collect()
    }

    pub async fn get_connected_servers(&self) -> Vec<ServerInstance> {
        self.servers
            .read()
            .await
            .values()
            .filter(|s| s.is_available())
            .cloned()
            .collect()
    }

    pub async fn get_servers_by_priority(&self) -> Vec<ServerInstance> {
        let mut servers: Vec<ServerInstance> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| b.config.priority.cmp(&a.config.priority));
        servers
    }

    pub async fn get_critical_servers(&self) -> Vec<ServerInstance> {
        self.servers
            .read()
            .await
            .values()
            .filter(|s| s.config.critical)
            .cloned()
            .collect()
    }

    pub async fn update_state(&self, name: &str, state: ConnectionState) -> Result<(), RegistryError> {
        {
            let mut servers = self.servers.write().await;
            let instance = servers
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            instance.state = state;
        }
        self.events
            .publish(ServerEvent::StateChanged {
                name: name.to_string(),
                state,
            })
            .await;
        Ok(())
    }

    pub async fn mark_unavailable(&self, name: &str) -> Result<(), RegistryError> {
        self.update_state(name, ConnectionState::Error).await
    }

    /// Parallel fan-out; returns a per-name success map.
    pub async fn connect_all(&self) -> HashMap<String, bool> {
        let entries: Vec<(String, Arc<dyn McpClient>)> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .map(|s| (s.name.clone(), s.client.clone()))
                .collect()
        };

        let results = join_all(entries.into_iter().map(|(name, client)| async move {
            let result = client.connect().await;
            (name, result.success)
        }))
        .await;

        for (name, success) in &results {
            let state = if *success {
                ConnectionState::Connected
            } else {
                ConnectionState::Error
            };
            let _ = self.update_state(name, state).await;
        }
        results.into_iter().collect()
    }

    pub async fn disconnect_all(&self) {
        let clients: Vec<Arc<dyn McpClient>> = {
            let servers = self.servers.read().await;
            servers.values().map(|s| s.client.clone()).collect()
        };
        join_all(clients.iter().map(|c| c.disconnect())).await;
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for name in names {
            let _ = self.update_state(&name, ConnectionState::Disconnected).await;
        }
    }

    /// Fetches the backend's tool/resource catalog, updating the stored
    /// instance. Resource content itself is read lazily, cache-through,
    /// by the aggregator rather than eagerly here.
    pub async fn refresh_tools_and_resources(&self, name: &str) -> Result<(), RegistryError> {
        let client = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
                .client
                .clone()
        };

        let tools = client.list_tools().await.unwrap_or_else(|e| {
            tracing::warn!("failed to list tools for '{name}': {e}");
            Vec::new()
        });
        let resources = client.list_resources().await.unwrap_or_else(|e| {
            tracing::warn!("failed to list resources for '{name}': {e}");
            Vec::new()
        });

        let mut servers = self.servers.write().await;
        if let Some(instance) = servers.get_mut(name) {
            instance.tools = tools;
            instance.resources = resources;
        }
        Ok(())
    }

    pub async fn health_check(&self, name: &str) -> Result<bool, RegistryError> {
        let client = {
            let servers = self.servers.read().await;
            servers
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
                .client
                .clone()
        };
        let healthy = matches!(client.ping().await, Ok(true));

        let mut servers = self.servers.write().await;
        if let Some(instance) = servers.get_mut(name) {
            if healthy {
                instance.consecutive_failures = 0;
                instance.last_seen = Some(Utc::now());
            } else {
                instance.consecutive_failures += 1;
                instance.state = ConnectionState::Error;
            }
        }
        Ok(healthy)
    }

    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        let mut results = HashMap::with_capacity(names.len());
        for name in names {
            if let Ok(healthy) = self.health_check(&name).await {
                results.insert(name, healthy);
            }
        }
        results
    }

    pub async fn get_statistics(&self) -> RegistryStatistics {
        let servers = self.servers.read().await;
        let mut stats = RegistryStatistics {
            total: servers.len(),
            ..Default::default()
        };
        for instance in servers.values() {
            match instance.state {
                ConnectionState::Connected => stats.connected += 1,
                ConnectionState::Disconnected => stats.disconnected += 1,
                ConnectionState::Error => stats.errored += 1,
                _ => {}
            }
            if instance.config.critical && !instance.is_available() {
                stats.critical_down += 1;
            }
            stats.total_requests += instance.stats.requests_sent;
            stats.total_errors += instance.stats.errors_count;
        }
        stats
    }

    pub async fn save_state(&self) -> Vec<SavedServer> {
        self.servers
            .read()
            .await
            .values()
            .map(|s| SavedServer {
                name: s.name.clone(),
                config: s.config.clone(),
            })
            .collect()
    }

    /// Reconstructs clients via `factory` and re-registers every saved
    /// server.
    pub async fn load_state(
        &self,
        saved: Vec<SavedServer>,
        factory: impl Fn(&ServerConfig) -> Result<Arc<dyn McpClient>, mcp_client::ClientError>,
    ) -> Result<(), RegistryError> {
        for entry in saved {
            let client = factory(&entry.config).map_err(|e| {
                tracing::error!("failed to rebuild client for '{}': {e}", entry.name);
                RegistryError::NotFound(entry.name.clone())
            })?;
            self.register(entry.name, client, entry.config).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClient;
    use std::time::Duration;

    fn config(name: &str, priority: u8, critical: bool) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            enabled: true,
            description: None,
            transport: mcp_core::config::TransportConfig::Stdio(mcp_core::config::StdioConfig {
                command: "noop".into(),
                args: vec![],
                env: Default::default(),
                cwd: None,
                buffer_size: 1024,
                shutdown_timeout_ms: 1000,
            }),
            priority,
            critical,
            timeout: Duration::from_secs(5),
            retry_attempts: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_names() {
        let registry = ServerRegistry::new();
        let client = Arc::new(FakeClient::new("db"));
        registry
            .register("db", client.clone(), config("db", 50, false))
            .await
            .unwrap();
        let err = registry
            .register("db", client, config("db", 50, false))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn get_servers_by_priority_is_descending() {
        let registry = ServerRegistry::new();
        registry
            .register("low", Arc::new(FakeClient::new("low")), config("low", 10, false))
            .await
            .unwrap();
        registry
            .register(
                "high",
                Arc::new(FakeClient::new("high")),
                config("high", 90, false),
            )
            .await
            .unwrap();
        let ordered = registry.get_servers_by_priority().await;
        assert_eq!(ordered[0].name, "high");
        assert_eq!(ordered[1].name, "low");
    }

    #[tokio::test]
    async fn critical_down_is_counted_in_statistics() {
        let registry = ServerRegistry::new();
        let client = Arc::new(FakeClient::new("db"));
        registry
            .register("db", client, config("db", 50, true))
            .await
            .unwrap();
        let stats = registry.get_statistics().await;
        assert_eq!(stats.critical_down, 1);
    }

    #[tokio::test]
    async fn unregister_removes_and_disconnects() {
        let registry = ServerRegistry::new();
        let client = Arc::new(FakeClient::new("db"));
        registry
            .register("db", client.clone(), config("db", 50, false))
            .await
            .unwrap();
        registry.unregister("db").await.unwrap();
        assert!(registry.get_server("db").await.is_none());
        assert!(client.disconnect_called().await);
    }
}
