//! LRU-by-key cache with TTL eviction, size/item caps, optional
//! compression, and glob-pattern invalidation

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::errors::CacheError;
use crate::stats::CacheStats;

const COMPRESS_THRESHOLD_BYTES: usize = 1024;

/// A value handed to `put` or returned by `get`. Text is the common case
/// (resource bodies, tool schemas serialized as JSON); `Binary` covers
/// blobs that aren't valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Text(String),
    Binary(Vec<u8>),
}

impl CacheValue {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) => b,
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// Internal representation of one cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheItem {
    value: Vec<u8>,
    is_text: bool,
    size_bytes: u64,
    created_at: i64,
    accessed_at: i64,
    access_count: u64,
    ttl_seconds: Option<i64>,
    compressed: bool,
}

impl CacheItem {
    fn is_expired(&self, now: i64) -> bool {
        match self.ttl_seconds {
            None => false,
            Some(ttl) => now > self.created_at + ttl,
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

struct Inner {
    map: IndexMap<String, CacheItem>,
    total_size_bytes: u64,
    stats: CacheStats,
}

/// On-disk snapshot format. Implementation-defined— no
/// cross-runtime portability is required.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    items: Vec<(String, CacheItem)>,
    stats: CacheStats,
}

pub struct ResourceCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                map: IndexMap::new(),
                total_size_bytes: 0,
                stats: CacheStats::default(),
            }),
        })
    }

    pub async fn get(&self, key: &str, refresh_ttl: bool) -> Option<CacheValue> {
        let now = now_unix();
        let mut inner = self.inner.lock().await;

        let Some(item) = inner.map.get(key) else {
            inner.stats.misses += 1;
            return None;
        };

        if item.is_expired(now) {
            if let Some(item) = inner.map.shift_remove(key) {
                inner.total_size_bytes -= item.size_bytes;
            }
            inner.stats.misses += 1;
            inner.stats.evictions += 1;
            inner.stats.total_items = inner.map.len();
            inner.stats.total_size_bytes = inner.total_size_bytes;
            return None;
        }

        let mut item = inner.map.shift_remove(key).expect("just checked present");
        item.accessed_at = now;
        item.access_count += 1;
        if refresh_ttl && item.ttl_seconds.is_some() {
            item.created_at = now;
        }
        let is_text = item.is_text;
        let compressed = item.compressed;
        let raw = item.value.clone();
        inner.map.insert(key.to_string(), item);
        inner.stats.hits += 1;

        let bytes = if compressed {
            match decompress(&raw) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("cache entry '{key}' failed to decompress: {e}");
                    return None;
                }
            }
        } else {
            raw
        };

        Some(bytes_to_value(bytes, is_text))
    }

    pub async fn put(
        &self,
        key: impl Into<String>,
        value: CacheValue,
        ttl_seconds: Option<i64>,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let ttl_seconds = Some(ttl_seconds.unwrap_or(self.config.default_ttl_seconds));
        let is_text = value.is_text();
        let raw = value.into_bytes();
        let original_size = raw.len() as u64;
        let max_size_bytes = self.config.max_size_bytes();

        if original_size > max_size_bytes {
            return Err(CacheError::ItemTooLarge {
                size_bytes: original_size as usize,
                max_bytes: max_size_bytes as usize,
            });
        }

        let mut compressed = false;
        let mut stored = raw;
        let mut compressed_delta = None;
        if self.config.enable_compression && stored.len() > COMPRESS_THRESHOLD_BYTES {
            let candidate = compress(&stored)?;
            if candidate.len() < stored.len() {
                compressed_delta = Some((stored.len() as u64, candidate.len() as u64));
                stored = candidate;
                compressed = true;
            }
        }
        let size_bytes = stored.len() as u64;

        let now = now_unix();
        let mut inner = self.inner.lock().await;

        if let Some(old) = inner.map.shift_remove(&key) {
            inner.total_size_bytes -= old.size_bytes;
        }

        evict_if_needed(&mut inner, &self.config, size_bytes);

        let item = CacheItem {
            value: stored,
            is_text,
            size_bytes,
            created_at: now,
            accessed_at: now,
            access_count: 1,
            ttl_seconds,
            compressed,
        };
        inner.map.insert(key, item);
        inner.total_size_bytes += size_bytes;
        inner.stats.puts += 1;
        if let Some((original, compressed_len)) = compressed_delta {
            inner.stats.original_size_bytes += original;
            inner.stats.compressed_size_bytes += compressed_len;
        }
        inner.stats.total_items = inner.map.len();
        inner.stats.total_size_bytes = inner.total_size_bytes;
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(item) = inner.map.shift_remove(key) {
            inner.total_size_bytes -= item.size_bytes;
            inner.stats.invalidations += 1;
            inner.stats.total_items = inner.map.len();
            inner.stats.total_size_bytes = inner.total_size_bytes;
        }
    }

    pub async fn invalidate_pattern(&self, pattern: &str) {
        let Ok(pattern) = glob::Pattern::new(pattern) else {
            tracing::warn!("invalid glob pattern for cache invalidation: {pattern}");
            return;
        };
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .map
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect();
        for key in keys {
            if let Some(item) = inner.map.shift_remove(&key) {
                inner.total_size_bytes -= item.size_bytes;
                inner.stats.invalidations += 1;
            }
        }
        inner.stats.total_items = inner.map.len();
        inner.stats.total_size_bytes = inner.total_size_bytes;
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.map.clear();
        inner.total_size_bytes = 0;
        inner.stats.total_items = 0;
        inner.stats.total_size_bytes = 0;
    }

    pub async fn warm(&self, items: Vec<(String, CacheValue, Option<i64>)>) -> Result<(), CacheError> {
        for (key, value, ttl) in items {
            self.put(key, value, ttl).await?;
        }
        Ok(())
    }

    pub async fn put_many(
        &self,
        items: Vec<(String, CacheValue)>,
        ttl_seconds: Option<i64>,
    ) -> Result<(), CacheError> {
        for (key, value) in items {
            self.put(key, value, ttl_seconds).await?;
        }
        Ok(())
    }

    pub async fn get_many(&self, keys: &[String]) -> Vec<(String, Option<CacheValue>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.get(key, false).await;
            results.push((key.clone(), value));
        }
        results
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let mut stats = inner.stats.clone();
        stats.total_items = inner.map.len();
        stats.total_size_bytes = inner.total_size_bytes;
        stats
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn save_to_disk(&self, path: &std::path::Path) -> Result<(), CacheError> {
        let inner = self.inner.lock().await;
        let snapshot = Snapshot {
            items: inner
                .map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stats: inner.stats.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn load_from_disk(&self, path: &std::path::Path) -> Result<(), CacheError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let mut inner = self.inner.lock().await;
        inner.total_size_bytes = snapshot.items.iter().map(|(_, item)| item.size_bytes).sum();
        inner.map = snapshot.items.into_iter().collect();
        inner.stats = snapshot.stats;
        Ok(())
    }
}

fn evict_if_needed(inner: &mut Inner, config: &CacheConfig, required_bytes: u64) {
    while inner.map.len() >= config.max_items {
        let Some((_, item)) = inner.map.shift_remove_index(0) else {
            break;
        };
        inner.total_size_bytes -= item.size_bytes;
        inner.stats.evictions += 1;
    }
    while inner.total_size_bytes + required_bytes > config.max_size_bytes() {
        let Some((_, item)) = inner.map.shift_remove_index(0) else {
            break;
        };
        inner.total_size_bytes -= item.size_bytes;
        inner.stats.evictions += 1;
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn bytes_to_value(bytes: Vec<u8>, is_text: bool) -> CacheValue {
    if is_text {
        match String::from_utf8(bytes) {
            Ok(s) => CacheValue::Text(s),
            Err(e) => CacheValue::Binary(e.into_bytes()),
        }
    } else {
        CacheValue::Binary(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(max_items: usize) -> CacheConfig {
        CacheConfig {
            max_size_mb: 10,
            max_items,
            default_ttl_seconds: 3600,
            enable_metrics: true,
            enable_compression: false,
        }
    }

    fn text(s: &str) -> CacheValue {
        CacheValue::Text(s.to_string())
    }

    #[tokio::test]
    async fn lru_plus_ttl_scenario() {
        let cache = ResourceCache::new(small_config(3)).unwrap();
        cache.put("a", text("1"), None).await.unwrap();
        cache.put("b", text("2"), None).await.unwrap();
        cache.put("c", text("3"), None).await.unwrap();
        assert_eq!(cache.get("a", false).await, Some(text("1")));
        cache.put("d", text("4"), None).await.unwrap();

        assert_eq!(cache.get("b", false).await, None);
        assert_eq!(cache.get("a", false).await, Some(text("1")));
        assert_eq!(cache.get("c", false).await, Some(text("3")));
        assert_eq!(cache.get("d", false).await, Some(text("4")));
    }

    #[tokio::test]
    async fn get_moves_key_to_most_recently_used() {
        let cache = ResourceCache::new(small_config(2)).unwrap();
        cache.put("a", text("1"), None).await.unwrap();
        cache.put("b", text("2"), None).await.unwrap();
        cache.get("a", false).await;
        cache.put("c", text("3"), None).await.unwrap();
        assert_eq!(cache.get("b", false).await, None);
        assert_eq!(cache.get("a", false).await, Some(text("1")));
    }

    #[tokio::test]
    async fn expired_entry_counts_as_miss_and_eviction() {
        let cache = ResourceCache::new(CacheConfig {
            default_ttl_seconds: 1,
            ..small_config(10)
        })
        .unwrap();
        cache.put("a", text("1"), Some(-10)).await.unwrap();
        assert_eq!(cache.get("a", false).await, None);
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn put_rejects_item_larger_than_max_size() {
        let cache = ResourceCache::new(CacheConfig {
            max_size_mb: 1,
            max_items: 10,
            default_ttl_seconds: 60,
            enable_metrics: true,
            enable_compression: false,
        })
        .unwrap();
        let huge = "x".repeat(2 * 1024 * 1024);
        let err = cache.put("big", text(&huge), None).await.unwrap_err();
        assert!(matches!(err, CacheError::ItemTooLarge { .. }));
    }

    #[tokio::test]
    async fn compression_only_kept_when_smaller() {
        let cache = ResourceCache::new(CacheConfig {
            enable_compression: true,
            ..small_config(10)
        })
        .unwrap();
        let compressible = "a".repeat(4000);
        cache.put("k", text(&compressible), None).await.unwrap();
        let stats = cache.stats().await;
        assert!(stats.compressed_size_bytes > 0);
        assert_eq!(cache.get("k", false).await, Some(text(&compressible)));
    }

    #[tokio::test]
    async fn invalidate_pattern_matches_glob() {
        let cache = ResourceCache::new(small_config(10)).unwrap();
        cache.put("user:1", text("a"), None).await.unwrap();
        cache.put("user:2", text("b"), None).await.unwrap();
        cache.put("order:1", text("c"), None).await.unwrap();
        cache.invalidate_pattern("user:*").await;
        assert_eq!(cache.get("user:1", false).await, None);
        assert_eq!(cache.get("user:2", false).await, None);
        assert_eq!(cache.get("order:1", false).await, Some(text("c")));
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResourceCache::new(small_config(10)).unwrap();
        cache.put("a", text("1"), None).await.unwrap();
        cache.save_to_disk(&path).await.unwrap();

        let reloaded = ResourceCache::new(small_config(10)).unwrap();
        reloaded.load_from_disk(&path).await.unwrap();
        assert_eq!(reloaded.get("a", false).await, Some(text("1")));
    }

    #[tokio::test]
    async fn never_exceeds_item_or_size_caps() {
        // puts must never exceed the configured item or byte caps
        let cache = ResourceCache::new(small_config(3)).unwrap();
        for i in 0..10 {
            cache
                .put(format!("k{i}"), text(&i.to_string()), None)
                .await
                .unwrap();
            let stats = cache.stats().await;
            assert!(stats.total_items <= 3);
        }
    }
}
