//! Cache configuration

use crate::errors::CacheError;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size_mb: u64,
    pub max_items: usize,
    pub default_ttl_seconds: i64,
    pub enable_metrics: bool,
    pub enable_compression: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            max_items: 1000,
            default_ttl_seconds: 3600,
            enable_metrics: true,
            enable_compression: false,
        }
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size_mb == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size_mb must be greater than zero".into(),
            ));
        }
        if self.max_items == 0 {
            return Err(CacheError::InvalidConfig(
                "max_items must be greater than zero".into(),
            ));
        }
        if self.default_ttl_seconds <= 0 {
            return Err(CacheError::InvalidConfig(
                "default_ttl_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
