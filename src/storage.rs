use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::{metrics, RelayError, Result};

/// Origin object fetched from a bucket. The body is an open handle the
/// caller must drain or drop; `size` is zero when the store did not report
/// a content length.
pub struct FetchedObject {
    pub body: ByteStream,
    pub size: u64,
}

/// Narrow capability over the origin store: streaming reads with typed
/// failover to a backup bucket, plus pre-signed GET URL minting.
pub struct Origin {
    client: Client,
    bucket: String,
    backup_bucket: Option<String>,
}

impl Origin {
    pub async fn connect(cfg: &Config) -> Self {
        let credentials = Credentials::new(
            cfg.s3_access_key.clone(),
            cfg.s3_secret_key.clone(),
            None,
            None,
            "imgrelay",
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(cfg.s3_region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &cfg.s3_endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        // A custom domain fronts the bucket itself, so requests use
        // virtual-hosted addressing; otherwise honour the path-style flag.
        let force_path_style = !cfg.s3_use_custom_domain && cfg.s3_force_path_style;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: cfg.s3_bucket.clone(),
            backup_bucket: cfg.s3_backup_bucket.clone(),
        }
    }

    /// Stream an object, failing over to the backup bucket only for error
    /// classes where the backup could plausibly differ: typed not-found,
    /// HTTP 404/408/429, any 5xx, or non-HTTP transport errors. Other 4xx
    /// are client-authored and would fail identically on the backup. When
    /// both buckets fail, the primary error is surfaced.
    pub async fn get(&self, key: &str) -> Result<FetchedObject> {
        let start = Instant::now();

        let primary_err = match self.get_from(&self.bucket, key).await {
            Ok(fetched) => {
                metrics::ORIGIN_FETCH_DURATION.observe(start.elapsed().as_secs_f64());
                return Ok(fetched);
            }
            Err(e) => e,
        };

        if let Some(backup) = &self.backup_bucket {
            if should_failover(&primary_err) {
                if let Ok(fetched) = self.get_from(backup, key).await {
                    metrics::ORIGIN_FETCH_DURATION.observe(start.elapsed().as_secs_f64());
                    return Ok(fetched);
                }
            }
        }

        Err(map_get_error(key, &primary_err))
    }

    async fn get_from(
        &self,
        bucket: &str,
        key: &str,
    ) -> std::result::Result<FetchedObject, SdkError<GetObjectError>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        Ok(FetchedObject {
            body: output.body,
            size,
        })
    }

    /// Mint a pre-signed GET URL valid for `ttl`.
    pub async fn presign(&self, key: &str, ttl: Duration) -> Result<String> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| RelayError::Dependency(format!("presign config: {}", e)))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| RelayError::Dependency(format!("presign request: {}", e)))?;
        Ok(request.uri().to_string())
    }

    /// Reachability probe for the health endpoint.
    pub async fn health(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Dependency(format!("origin probe: {}", e)))
    }
}

fn is_not_found(err: &SdkError<GetObjectError>) -> bool {
    if let Some(service_err) = err.as_service_error() {
        if service_err.is_no_such_key() || service_err.code() == Some("NotFound") {
            return true;
        }
    }
    err.raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false)
}

fn should_failover(err: &SdkError<GetObjectError>) -> bool {
    if is_not_found(err) {
        return true;
    }
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(status) => failover_status(status),
        // Dispatch failures, timeouts and other non-HTTP errors: the
        // backup is a legitimate safety net.
        None => true,
    }
}

/// HTTP-status failover policy, separated out so the classification is
/// testable without constructing SDK error values.
fn failover_status(status: u16) -> bool {
    match status {
        404 | 408 | 429 => true,
        s if s >= 500 => true,
        s if (400..500).contains(&s) => false,
        _ => true,
    }
}

fn map_get_error(key: &str, err: &SdkError<GetObjectError>) -> RelayError {
    if is_not_found(err) {
        return RelayError::NotFound(key.to_string());
    }
    match err {
        SdkError::TimeoutError(_) => RelayError::Transient(format!("origin timeout for {}", key)),
        _ => RelayError::Dependency(format!("origin fetch for {}: {}", key, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failover_statuses_follow_policy() {
        assert!(failover_status(404));
        assert!(failover_status(408));
        assert!(failover_status(429));
        assert!(failover_status(500));
        assert!(failover_status(503));

        assert!(!failover_status(400));
        assert!(!failover_status(401));
        assert!(!failover_status(403));
        assert!(!failover_status(418));
    }
}
