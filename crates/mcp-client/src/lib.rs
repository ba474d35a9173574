//! Transport-abstracted MCP client layer: a common contract plus stdio,
//! SSE, and HTTP implementations.

pub mod client;
pub mod errors;
pub mod factory;
pub mod http;
pub mod pending;
pub mod protocol;
pub mod sse;
pub mod stdio;

pub use client::{ClientMetadata, ConnectionResult, McpClient};
pub use errors::ClientError;
pub use factory::build_client;
pub use http::HttpClient;
pub use sse::SseClient;
pub use stdio::StdioClient;
