//! Shared data model, error taxonomy, and config schema for the MCP aggregator.

pub mod aggregated;
pub mod config;
pub mod errors;
pub mod interpolation;
pub mod model;

pub use aggregated::{
    AggregatedResource, AggregatedTool, AggregationMetadata, ConflictDetail, ConflictItemType,
    NamespaceConflict, ResolutionStrategy,
};
pub use config::{AggregatorConfig, RoutingRule, ServerConfig, TransportConfig};
pub use errors::{ConfigError, NamespaceError};
pub use model::{
    ConnectionState, ConnectionStats, InitializeResult, Resource, ResourceContent, Tool,
    ToolResult,
};
