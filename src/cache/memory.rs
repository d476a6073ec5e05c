use bytes::Bytes;
use moka::future::Cache;
use std::time::Duration;

use super::CacheTier;
use crate::Result;

/// In-process LRU tier backed by moka, capped either by entry count or by
/// total payload bytes. Entries expire after the tier default TTL; per-call
/// TTLs are ignored here, matching the "tier default" contract.
pub struct MemoryCache {
    cache: Cache<String, Bytes>,
}

impl MemoryCache {
    /// `limit_bytes > 0` selects the byte-counted variant, where each
    /// entry's cost equals its payload length. Otherwise `size` caps the
    /// entry count.
    pub fn new(size: u64, limit_bytes: u64, default_ttl: Duration) -> Self {
        let builder = if limit_bytes > 0 {
            Cache::builder()
                .max_capacity(limit_bytes)
                .weigher(|_k: &String, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
        } else {
            Cache::builder().max_capacity(size.max(1))
        };

        Self {
            cache: builder.time_to_live(default_ttl).build(),
        }
    }
}

#[async_trait::async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<()> {
        self.cache.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
