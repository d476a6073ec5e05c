use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::CacheTier;
use crate::Result;

/// Two-level composition: memory in front of an optional shared tier.
/// A remote hit back-populates memory with the tier-default TTL.
pub struct TieredCache {
    l1: Arc<dyn CacheTier>,
    l2: Option<Arc<dyn CacheTier>>,
}

impl TieredCache {
    pub fn new(l1: Arc<dyn CacheTier>, l2: Option<Arc<dyn CacheTier>>) -> Self {
        Self { l1, l2 }
    }
}

#[async_trait::async_trait]
impl CacheTier for TieredCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(value) = self.l1.get(key).await {
            return Some(value);
        }

        if let Some(l2) = &self.l2 {
            if let Some(value) = l2.get(key).await {
                if let Err(e) = self.l1.set(key, value.clone(), Duration::ZERO).await {
                    tracing::warn!(key, error = %e, "memory back-populate failed");
                }
                return Some(value);
            }
        }

        None
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        if let Err(e) = self.l1.set(key, value.clone(), ttl).await {
            tracing::warn!(key, error = %e, "memory cache write failed");
        }
        if let Some(l2) = &self.l2 {
            return l2.set(key, value, ttl).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Err(e) = self.l1.delete(key).await {
            tracing::warn!(key, error = %e, "memory cache delete failed");
        }
        if let Some(l2) = &self.l2 {
            return l2.delete(key).await;
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.l1.health().await?;
        if let Some(l2) = &self.l2 {
            l2.health().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn get_falls_back_and_backfills() {
        let l1 = Arc::new(MemoryCache::new(10, 0, Duration::from_secs(60)));
        let l2 = Arc::new(MemoryCache::new(10, 0, Duration::from_secs(60)));
        l2.set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();

        let tiered = TieredCache::new(l1.clone(), Some(l2));
        assert_eq!(tiered.get("k").await, Some(Bytes::from_static(b"v")));
        // Back-populated into the front tier.
        assert_eq!(l1.get("k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let l1 = Arc::new(MemoryCache::new(10, 0, Duration::from_secs(60)));
        let l2 = Arc::new(MemoryCache::new(10, 0, Duration::from_secs(60)));
        let tiered = TieredCache::new(l1.clone(), Some(l2.clone()));

        tiered
            .set("k", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
        tiered.delete("k").await.unwrap();

        assert_eq!(l1.get("k").await, None);
        assert_eq!(l2.get("k").await, None);
        assert_eq!(tiered.get("k").await, None);
    }
}
