//! Cache usage statistics

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub total_items: usize,
    pub total_size_bytes: u64,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_size_bytes > 0 && self.original_size_bytes > 0 {
            self.original_size_bytes as f64 / self.compressed_size_bytes as f64
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_with_no_activity() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate_reflects_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn compression_ratio_defaults_to_one() {
        assert_eq!(CacheStats::default().compression_ratio(), 1.0);
    }

    #[test]
    fn compression_ratio_reflects_savings() {
        let stats = CacheStats {
            original_size_bytes: 1000,
            compressed_size_bytes: 250,
            ..Default::default()
        };
        assert_eq!(stats.compression_ratio(), 4.0);
    }
}
