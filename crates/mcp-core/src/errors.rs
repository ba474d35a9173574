//! Error taxonomy shared by the config schema and namespace layer.
//!
//! Transport, routing, and cache errors live in their own crates next to
//! the code that raises them; this module only holds the errors that
//! belong to `mcp-core` itself.

use thiserror::Error;

/// Errors raised while validating a config schema (not file loading —
/// that is a host-application concern).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server '{name}': {reason}")]
    InvalidServer { name: String, reason: String },

    #[error("duplicate server name '{0}'")]
    DuplicateServerName(String),

    #[error("no servers configured")]
    NoServers,

    #[error("unresolved environment variable '{0}'")]
    UnresolvedEnvVar(String),

    #[error("malformed interpolation expression: {0}")]
    MalformedExpression(String),
}

/// Errors raised by the namespace manager.
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("invalid or reserved namespace: '{0}'")]
    InvalidNamespace(String),

    #[error("conflict resolution failed for '{0}'")]
    ResolutionFailed(String),
}
