use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::signature::SIGNATURE_FIELD;

/// Content-encoding variants a passthrough entry can be stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Brotli,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Brotli => "br",
        }
    }

    /// Pick the best supported encoding from an `Accept-Encoding` header.
    pub fn negotiate(accept_encoding: &str) -> Self {
        if accept_encoding.contains("br") {
            Encoding::Brotli
        } else if accept_encoding.contains("gzip") {
            Encoding::Gzip
        } else {
            Encoding::Identity
        }
    }
}

/// Cache key for an unprocessed (passthrough) entry: `H(objectKey ‖ encoding)`.
pub fn original_key(object_key: &str, encoding: Encoding) -> String {
    let mut hasher = Sha256::new();
    hasher.update(object_key.as_bytes());
    hasher.update(encoding.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a processed variant:
/// `H(objectKey ‖ Σ sorted(k ‖ v) for params \ {signature} ‖ format)`.
///
/// The signature field is excluded so signed and unsigned representations
/// of the same variant collide intentionally, and `BTreeMap` iteration
/// makes the digest independent of the client's query-parameter order.
pub fn processed_key(object_key: &str, params: &BTreeMap<String, String>, format: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(object_key.as_bytes());
    for (k, v) in params {
        if k == SIGNATURE_FIELD {
            continue;
        }
        hasher.update(k.as_bytes());
        hasher.update(v.as_bytes());
    }
    hasher.update(format.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sharded on-disk location for a cache key: `dir/xx/yy/<hex>`. Keys too
/// short to shard land directly in `dir`.
pub fn shard_path(dir: &Path, key: &str) -> PathBuf {
    if key.len() < 4 {
        return dir.join(key);
    }
    dir.join(&key[0..2]).join(&key[2..4]).join(key)
}

/// The cache key doubles as the entity tag.
pub fn etag(key: &str) -> String {
    format!("\"{}\"", key)
}
