use bytes::Bytes;
use redis::cluster_async::ClusterConnection;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

use super::CacheTier;
use crate::{RelayError, Result};

/// Shared KV tier over Redis. A single endpoint uses a managed connection;
/// a list of endpoints is treated as a cluster whose node selection is the
/// client's concern.
pub struct RemoteCache {
    conn: RemoteConn,
    default_ttl: Duration,
}

#[derive(Clone)]
enum RemoteConn {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

fn endpoint_url(addr: &str, password: &str, db: i64) -> String {
    let auth = if password.is_empty() {
        String::new()
    } else {
        format!(":{}@", password)
    };
    format!("redis://{}{}/{}", auth, addr, db)
}

impl RemoteCache {
    pub async fn connect(
        addrs: &[String],
        password: &str,
        db: i64,
        default_ttl: Duration,
    ) -> Result<Self> {
        let conn = if addrs.len() > 1 {
            let urls: Vec<String> = addrs
                .iter()
                .map(|a| endpoint_url(a, password, db))
                .collect();
            let client = redis::cluster::ClusterClient::new(urls)
                .map_err(|e| RelayError::Dependency(format!("redis cluster client: {}", e)))?;
            RemoteConn::Cluster(
                client
                    .get_async_connection()
                    .await
                    .map_err(|e| RelayError::Dependency(format!("redis cluster connect: {}", e)))?,
            )
        } else {
            let url = endpoint_url(&addrs[0], password, db);
            let client = redis::Client::open(url)
                .map_err(|e| RelayError::Dependency(format!("redis client: {}", e)))?;
            RemoteConn::Single(
                ConnectionManager::new(client)
                    .await
                    .map_err(|e| RelayError::Dependency(format!("redis connect: {}", e)))?,
            )
        };

        Ok(Self { conn, default_ttl })
    }
}

#[async_trait::async_trait]
impl CacheTier for RemoteCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let result: redis::RedisResult<Option<Vec<u8>>> = match self.conn.clone() {
            RemoteConn::Single(mut c) => c.get(key).await,
            RemoteConn::Cluster(mut c) => c.get(key).await,
        };
        match result {
            Ok(v) => v.map(Bytes::from),
            Err(e) => {
                tracing::debug!(key, error = %e, "remote cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let secs = ttl.as_secs().max(1);
        let result: redis::RedisResult<()> = match self.conn.clone() {
            RemoteConn::Single(mut c) => c.set_ex(key, value.as_ref(), secs).await,
            RemoteConn::Cluster(mut c) => c.set_ex(key, value.as_ref(), secs).await,
        };
        result.map_err(|e| RelayError::Dependency(format!("remote cache write: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let result: redis::RedisResult<()> = match self.conn.clone() {
            RemoteConn::Single(mut c) => c.del(key).await,
            RemoteConn::Cluster(mut c) => c.del(key).await,
        };
        result.map_err(|e| RelayError::Dependency(format!("remote cache delete: {}", e)))
    }

    async fn health(&self) -> Result<()> {
        let result: redis::RedisResult<String> = match self.conn.clone() {
            RemoteConn::Single(mut c) => redis::cmd("PING").query_async(&mut c).await,
            RemoteConn::Cluster(mut c) => redis::cmd("PING").query_async(&mut c).await,
        };
        result
            .map(|_| ())
            .map_err(|e| RelayError::Dependency(format!("remote cache ping: {}", e)))
    }
}
