//! LRU+TTL resource cache with optional compression and disk persistence.

pub mod cache;
pub mod config;
pub mod errors;
pub mod stats;

pub use cache::{CacheValue, ResourceCache};
pub use config::CacheConfig;
pub use errors::CacheError;
pub use stats::CacheStats;
