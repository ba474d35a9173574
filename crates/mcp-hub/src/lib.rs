//! Registry, namespace resolution, aggregation, and routing for a
//! multi-backend MCP deployment.

pub mod aggregator;
pub mod errors;
pub mod events;
pub mod namespace;
pub mod registry;
pub mod router;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use errors::{RegistryError, RoutingError};
pub use events::{EventBus, EventHandler, ServerEvent};
pub use namespace::NamespaceManager;
pub use registry::{RegistryStatistics, SavedServer, ServerInstance, ServerRegistry};
pub use router::{Router, RoutingMetrics};

/// Top-level handle wiring a registry, namespace manager, aggregator, and
/// router together over a shared set of backends.
pub struct Hub {
    pub registry: Arc<ServerRegistry>,
    pub namespace: Arc<NamespaceManager>,
    pub aggregator: Arc<Aggregator>,
    pub router: Arc<Router>,
}

impl Hub {
    pub fn new(cache: Arc<mcp_cache::ResourceCache>, resolution: mcp_core::ResolutionStrategy) -> Arc<Self> {
        let registry = Arc::new(ServerRegistry::new());
        let namespace = Arc::new(NamespaceManager::new(resolution));
        let aggregator = Aggregator::new(
            registry.clone(),
            namespace.clone(),
            cache,
            AggregatorConfig::default(),
        );
        let router = Router::new(registry.clone(), namespace.clone());
        aggregator.bind_router(router.clone());
        Arc::new(Self {
            registry,
            namespace,
            aggregator,
            router,
        })
    }

    pub async fn initialize(self: &Arc<Self>) {
        self.aggregator.initialize().await;
    }
}
