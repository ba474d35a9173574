//! Denormalized, refreshable cross-server view of tools and resources
//!

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mcp_cache::{CacheValue, ResourceCache};
use mcp_core::{
    AggregatedResource, AggregatedTool, AggregationMetadata, ConnectionState, ResolutionStrategy,
};
use tokio::sync::{OnceCell, RwLock};

use crate::events::ServerEvent;
use crate::namespace::{create_namespaced_name, NamespaceManager};
use crate::registry::ServerRegistry;
use crate::router::Router;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub parallel_fetch: bool,
    pub default_cache_ttl_seconds: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            parallel_fetch: true,
            default_cache_ttl_seconds: 3600,
        }
    }
}

struct ViewState {
    tools: Vec<AggregatedTool>,
    resources: Vec<AggregatedResource>,
}

pub struct Aggregator {
    registry: Arc<ServerRegistry>,
    namespace: Arc<NamespaceManager>,
    cache: Arc<ResourceCache>,
    config: AggregatorConfig,
    view: RwLock<ViewState>,
    router: OnceCell<Arc<Router>>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<ServerRegistry>,
        namespace: Arc<NamespaceManager>,
        cache: Arc<ResourceCache>,
        config: AggregatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            namespace,
            cache,
            config,
            view: RwLock::new(ViewState {
                tools: Vec::new(),
                resources: Vec::new(),
            }),
            router: OnceCell::new(),
        })
    }

    /// Wires in the router used by `execute_tool`. Called once during
    /// hub construction, after both have been built from the same
    /// registry.
    pub fn bind_router(&self, router: Arc<Router>) {
        let _ = self.router.set(router);
    }

    /// Subscribes to registry events and runs the initial `refresh_all`.
    pub async fn initialize(self: &Arc<Self>) {
        let this = self.clone();
        self.registry
            .subscribe(Arc::new(move |event: &ServerEvent| {
                let this = this.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    this.handle_event(event).await;
                });
            }))
            .await;
        self.refresh_all().await;
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::ServerRegistered { .. } => self.refresh_all().await,
            ServerEvent::ServerUnregistered { name } => self.drop_server(&name).await,
            ServerEvent::StateChanged { name, state } => self.update_server_state(&name, state).await,
        }
    }

    pub async fn refresh_all(&self) {
        if self.config.parallel_fetch {
            let (_, _) = tokio::join!(self.refresh_tools(), self.refresh_resources());
        } else {
            self.refresh_tools().await;
            self.refresh_resources().await;
        }
    }

    pub async fn refresh_tools(&self) {
        let servers = self.registry.get_servers_by_priority().await;
        let mut priorities = HashMap::new();
        let mut by_server = Vec::new();
        for instance in &servers {
            priorities.insert(instance.name.clone(), instance.config.priority);
            let tools: Vec<_> = instance
                .client
                .list_tools()
                .await
                .map_err(|e| tracing::warn!("refresh_tools: {} unreachable: {e}", instance.name))
                .unwrap_or_default()
                .into_iter()
                .map(|t| (t.name.clone(), serde_json::to_value(&t).unwrap_or_default()))
                .collect();
            by_server.push((instance.name.clone(), tools));
        }

        self.namespace.clear().await;
        self.namespace
            .detect_tool_conflicts(&by_server, &priorities)
            .await;

        let mut aggregated = Vec::new();
        for (server_name, tools) in &by_server {
            let is_available = servers
                .iter()
                .find(|s| &s.name == server_name)
                .map(|s| s.is_available())
                .unwrap_or(false);
            for (tool_name, details) in tools {
                aggregated.push(AggregatedTool {
                    namespaced_name: create_namespaced_name(server_name, tool_name),
                    original_name: tool_name.clone(),
                    server_name: server_name.clone(),
                    description: details
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: details
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({})),
                    priority: priorities.get(server_name).copied().unwrap_or(50),
                    is_available,
                });
            }
        }
        self.view.write().await.tools = aggregated;
    }

    pub async fn refresh_resources(&self) {
        let servers = self.registry.get_servers_by_priority().await;
        let mut priorities = HashMap::new();
        let mut by_server = Vec::new();
        for instance in &servers {
            priorities.insert(instance.name.clone(), instance.config.priority);
            let resources: Vec<_> = instance
                .client
                .list_resources()
                .await
                .map_err(|e| {
                    tracing::warn!("refresh_resources: {} unreachable: {e}", instance.name)
                })
                .unwrap_or_default()
                .into_iter()
                .map(|r| (r.uri.clone(), serde_json::to_value(&r).unwrap_or_default()))
                .collect();
            by_server.push((instance.name.clone(), resources));
        }

        self.namespace
            .detect_resource_conflicts(&by_server, &priorities)
            .await;

        let mut aggregated = Vec::new();
        for (server_name, resources) in &by_server {
            let is_available = servers
                .iter()
                .find(|s| &s.name == server_name)
                .map(|s| s.is_available())
                .unwrap_or(false);
            for (uri, details) in resources {
                let namespaced_uri = format!("{server_name}:{uri}");
                let cached = self.cache.get(&namespaced_uri, false).await;
                let content = match &cached {
                    Some(CacheValue::Text(s)) => Some(s.clone()),
                    Some(CacheValue::Binary(_)) | None => None,
                };
                aggregated.push(AggregatedResource {
                    namespaced_uri,
                    original_uri: uri.clone(),
                    server_name: server_name.clone(),
                    name: details
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or(uri)
                        .to_string(),
                    description: details
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    mime_type: details
                        .get("mimeType")
                        .and_then(|v| v.as_str())
                        .unwrap_or("text/plain")
                        .to_string(),
                    content,
                    cached_at: if cached.is_some() {
                        Some(Utc::now())
                    } else {
                        None
                    },
                    ttl_seconds: Some(self.config.default_cache_ttl_seconds),
                    is_available,
                });
            }
        }
        self.view.write().await.resources = aggregated;
    }

    pub async fn get_all_tools(&self) -> Vec<AggregatedTool> {
        self.view.read().await.tools.clone()
    }

    pub async fn get_tool(&self, namespaced_name: &str) -> Option<AggregatedTool> {
        self.view
            .read()
            .await
            .tools
            .iter()
            .find(|t| t.namespaced_name == namespaced_name)
            .cloned()
    }

    pub async fn get_all_resources(&self) -> Vec<AggregatedResource> {
        self.view.read().await.resources.clone()
    }

    /// Cache-through resource read: returns the cached copy when present,
    /// otherwise fetches from the owning backend and warms the cache.
    pub async fn get_resource(&self, namespaced_uri: &str) -> Option<AggregatedResource> {
        let mut resource = self
            .view
            .read()
            .await
            .resources
            .iter()
            .find(|r| r.namespaced_uri == namespaced_uri)
            .cloned()?;

        if resource.content.is_some() && !resource.is_expired() {
            return Some(resource);
        }

        if let Some(CacheValue::Text(text)) = self.cache.get(namespaced_uri, false).await {
            resource.content = Some(text);
            resource.cached_at = Some(Utc::now());
            return Some(resource);
        }

        let instance = self.registry.get_server(&resource.server_name).await?;
        match instance.client.read_resource(&resource.original_uri).await {
            Ok(content) => {
                if let mcp_core::ResourceBody::Text(text) = content.content {
                    let _ = self
                        .cache
                        .put(
                            namespaced_uri.to_string(),
                            CacheValue::Text(text.clone()),
                            resource.ttl_seconds,
                        )
                        .await;
                    resource.content = Some(text);
                    resource.cached_at = Some(Utc::now());
                }
            }
            Err(e) => {
                tracing::warn!("failed to read resource '{namespaced_uri}': {e}");
            }
        }
        Some(resource)
    }

    pub async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<mcp_core::ToolResult, crate::errors::RoutingError> {
        let router = self
            .router
            .get()
            .expect("router must be bound before execute_tool is called");
        router.route(name, args).await
    }

    pub async fn add_server(
        &self,
        name: impl Into<String>,
        client: Arc<dyn mcp_client::McpClient>,
        config: mcp_core::ServerConfig,
    ) -> Result<(), crate::errors::RegistryError> {
        self.registry.register(name, client, config).await?;
        self.refresh_all().await;
        Ok(())
    }

    pub async fn remove_server(&self, name: &str) -> Result<(), crate::errors::RegistryError> {
        self.registry.unregister(name).await?;
        self.drop_server(name).await;
        self.namespace.clear().await;
        self.refresh_all().await;
        Ok(())
    }

    async fn drop_server(&self, name: &str) {
        let mut view = self.view.write().await;
        view.tools.retain(|t| t.server_name != name);
        view.resources.retain(|r| r.server_name != name);
    }

    pub async fn update_server_state(&self, name: &str, state: ConnectionState) {
        let is_available = state == ConnectionState::Connected;
        let mut view = self.view.write().await;
        for tool in view.tools.iter_mut().filter(|t| t.server_name == name) {
            tool.is_available = is_available;
        }
        for resource in view.resources.iter_mut().filter(|r| r.server_name == name) {
            resource.is_available = is_available;
        }
    }

    pub async fn get_metadata(&self) -> AggregationMetadata {
        let stats = self.registry.get_statistics().await;
        let namespace_stats = self.namespace.get_statistics().await;
        let view = self.view.read().await;
        AggregationMetadata {
            total_servers: stats.total,
            connected_servers: stats.connected,
            total_tools: view.tools.len(),
            total_resources: view.resources.len(),
            namespace_conflicts: namespace_stats.total_conflicts,
            cache_size_bytes: self.cache.stats().await.total_size_bytes,
            last_updated: Utc::now(),
            has_critical_failures: stats.critical_down > 0,
        }
    }

    pub fn default_resolution_strategy() -> ResolutionStrategy {
        ResolutionStrategy::default()
    }
}
