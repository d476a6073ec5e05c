pub mod cleaner;
pub mod memory;
pub mod remote;
pub mod tiered;

pub use memory::MemoryCache;
pub use remote::RemoteCache;
pub use tiered::TieredCache;

use bytes::Bytes;
use std::time::Duration;

use crate::Result;

/// Unified contract over the byte-cache tiers (memory, remote, tiered).
///
/// `get` swallows backend errors and reports a miss: the read path must not
/// fail because a cache backend is unreachable. `set`/`delete` surface
/// errors so the caller can log them; the hot path never fails on them.
/// A `ttl` of zero means "use the tier's default".
///
/// The disk tier is intentionally not behind this trait: the orchestrator
/// reads modification times for stale-while-revalidate, which a plain
/// byte-oriented interface cannot express.
#[async_trait::async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Option<Bytes>;
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn health(&self) -> Result<()>;
}

/// Content type for a response, derived from the forced output format when
/// one was applied, otherwise from the object key's extension. No content
/// type is stored alongside cache entries.
pub fn content_type(object_key: &str, forced_format: &str) -> &'static str {
    let ext = if forced_format.is_empty() {
        object_key.rsplit('.').next().unwrap_or("")
    } else {
        forced_format
    };

    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "jxl" => "image/jxl",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_prefers_forced_format() {
        assert_eq!(content_type("img/a.png", "webp"), "image/webp");
        assert_eq!(content_type("img/a.png", ""), "image/png");
        assert_eq!(content_type("styles/site.css", ""), "text/css");
        assert_eq!(content_type("blob", ""), "application/octet-stream");
    }
}
