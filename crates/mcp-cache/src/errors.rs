use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("item too large: {size_bytes} bytes exceeds max {max_bytes} bytes")]
    ItemTooLarge { size_bytes: usize, max_bytes: usize },

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error persisting cache: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize cache snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}
