//! Errors raised by the registry, router, and aggregator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("server '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("server '{0}' is not registered")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("tool '{0}' not found on the target server")]
    ToolNotFound(String),

    #[error("server '{0}' is not available")]
    ServerNotAvailable(String),

    #[error("argument validation failed: {0}")]
    InvalidArguments(String),

    #[error("'{0}' resolves to multiple servers under the merge strategy; call a namespaced name instead")]
    AmbiguousMergeTarget(String),

    #[error(transparent)]
    Client(#[from] mcp_client::ClientError),
}
