use axum::body::Body;
use axum::extract::{ConnectInfo, Path, RawQuery, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::cache::{content_type, CacheTier, MemoryCache, RemoteCache, TieredCache};
use crate::coalesce::Singleflight;
use crate::config::{Config, ConfigHandle};
use crate::guard::{self, Limiter, LocalLimiter, SharedLimiter};
use crate::keys::{self, Encoding};
use crate::metrics;
use crate::signature::verify_signature;
use crate::storage::Origin;
use crate::transform::{
    self, palette, smartcrop::AiModelConfig, video, Format, Processor, TransformSpec,
};
use crate::watermark::WatermarkManager;
use crate::writer;
use crate::{RelayError, Result};

const CACHE_CONTROL: &str = "public, max-age=86400";
const PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state: the dependency graph is a straight line from
/// the handler down to the origin, constructed once at startup.
pub struct App {
    pub config: Arc<ConfigHandle>,
    pub origin: Origin,
    pub tiers: TieredCache,
    pub flight: Singleflight<Bytes>,
    pub limiter: Option<Limiter>,
    pub watermark: WatermarkManager,
}

impl App {
    pub async fn new(cfg: Config) -> Arc<App> {
        let origin = Origin::connect(&cfg).await;

        let memory: Arc<dyn CacheTier> = Arc::new(MemoryCache::new(
            cfg.memory_cache_size,
            cfg.memory_cache_limit_bytes,
            cfg.soft_ttl,
        ));
        let remote: Option<Arc<dyn CacheTier>> = if cfg.redis_addrs.is_empty() {
            None
        } else {
            match RemoteCache::connect(
                &cfg.redis_addrs,
                &cfg.redis_password,
                cfg.redis_db,
                cfg.soft_ttl,
            )
            .await
            {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    tracing::warn!(error = %e, "remote cache unavailable, continuing without it");
                    None
                }
            }
        };

        let limiter = if cfg.rate_limit == 0 {
            None
        } else if cfg.redis_addrs.is_empty() {
            Some(Limiter::Local(LocalLimiter::new(cfg.rate_limit)))
        } else {
            match SharedLimiter::connect(
                &cfg.redis_addrs[0],
                &cfg.redis_password,
                cfg.redis_db,
                cfg.rate_limit,
            )
            .await
            {
                Ok(shared) => Some(Limiter::Shared(shared)),
                Err(e) => {
                    tracing::warn!(error = %e, "shared rate limiter unavailable, using local limiter");
                    Some(Limiter::Local(LocalLimiter::new(cfg.rate_limit)))
                }
            }
        };

        let watermark = WatermarkManager::new(cfg.watermark_path.clone(), cfg.watermark_opacity);

        Arc::new(App {
            origin,
            tiers: TieredCache::new(memory, remote),
            flight: Singleflight::new(),
            limiter,
            watermark,
            config: Arc::new(ConfigHandle::new(cfg)),
        })
    }
}

pub async fn reject_root() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid Path").into_response()
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub details: HealthDetails,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthDetails {
    pub origin: String,
    pub cache: String,
}

pub async fn health(State(app): State<Arc<App>>) -> Response {
    let origin = app.origin.health().await;
    let cache = app.tiers.health().await;
    let healthy = origin.is_ok() && cache.is_ok();

    let report = |r: &Result<()>| match r {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        details: HealthDetails {
            origin: report(&origin),
            cache: report(&cache),
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(body)).into_response()
}

pub async fn metrics_exposition(State(app): State<Arc<App>>) -> Response {
    if !app.config.snapshot().enable_metrics {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::exposition(),
    )
        .into_response()
}

/// Assign every request a correlation ID, honouring an incoming
/// `X-Request-Id`, and echo it on the response so callers can quote it.
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = correlation_id(request.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request
            .headers_mut()
            .insert(REQUEST_ID_HEADER, value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
        return response;
    }
    next.run(request).await
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn fetch_asset(
    State(app): State<Arc<App>>,
    Path(raw_key): Path<String>,
    RawQuery(query): RawQuery,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let addr = connect.map(|c| c.0);
    let request_id = correlation_id(&headers);
    let span = tracing::info_span!("request", request_id = %request_id, key = %raw_key);

    async {
        match serve_asset(&app, &raw_key, query.as_deref(), &headers, addr).await {
            Ok(response) => response,
            Err(err) => error_response(&app, err, &raw_key, &request_id).await,
        }
    }
    .instrument(span)
    .await
}

pub async fn purge_asset(
    State(app): State<Arc<App>>,
    Path(raw_key): Path<String>,
    RawQuery(query): RawQuery,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let addr = connect.map(|c| c.0);
    let request_id = correlation_id(&headers);
    let span = tracing::info_span!("purge", request_id = %request_id, key = %raw_key);

    async {
        match purge(&app, &raw_key, query.as_deref(), &headers, addr).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    kind = err.kind(),
                    error = %err,
                    key = %raw_key,
                    request_id = %request_id,
                    "purge rejected"
                );
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

struct Prelude {
    cfg: Arc<Config>,
    object_key: String,
    params: BTreeMap<String, String>,
    spec: TransformSpec,
    is_image: bool,
    is_video: bool,
}

impl Prelude {
    fn should_process(&self) -> bool {
        (self.is_image && self.spec.wants_processing())
            || (self.is_video && self.cfg.enable_video_thumbnail)
    }
}

/// Common request front: path validation, access guard, rate limit,
/// signature verification, option parsing, format negotiation. Signature
/// validation happens before any I/O toward origin or the cache tiers.
async fn prepare(
    app: &App,
    raw_key: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    addr: Option<SocketAddr>,
) -> Result<Prelude> {
    let cfg = app.config.snapshot();
    let object_key = validate_key(raw_key)?;

    let ip = addr
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    guard::check_access(
        &cfg,
        &ip,
        header_str(headers, &header::REFERER),
        header_str(headers, &header::ORIGIN),
        country_header(headers),
    )?;

    if cfg.rate_limit > 0 {
        if let Some(limiter) = &app.limiter {
            if !limiter.allow(&ip).await {
                return Err(RelayError::RateLimited);
            }
        }
    }

    let params: BTreeMap<String, String> = match query {
        Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
            .map_err(|e| RelayError::InvalidInput(format!("query parse: {}", e)))?,
        _ => BTreeMap::new(),
    };

    if let Some(secret) = &cfg.secret_key {
        if !params.is_empty() {
            verify_signature(&format!("/{}", object_key), &params, secret)
                .map_err(|e| RelayError::Unauthorized(e.to_string()))?;
        }
    }

    let mut spec = TransformSpec::from_params(&params, &cfg.presets);
    let is_image = transform::is_image_key(&object_key);
    let is_video = transform::is_video_key(&object_key);

    if is_video && cfg.enable_video_thumbnail && spec.format.is_none() {
        spec.format = Some(Format::Jpeg);
    }
    if is_image && spec.format.is_none() {
        if let Some(accept) = header_str(headers, &header::ACCEPT) {
            spec.format = transform::negotiate_format(accept);
        }
    }

    Ok(Prelude {
        cfg,
        object_key,
        params,
        spec,
        is_image,
        is_video,
    })
}

fn validate_key(raw: &str) -> Result<String> {
    let key = raw.trim_start_matches('/');
    if key.is_empty()
        || key.contains("..")
        || key.split('/').any(|segment| segment.starts_with('.'))
    {
        return Err(RelayError::InvalidInput("invalid path".into()));
    }
    Ok(key.to_string())
}

async fn serve_asset(
    app: &Arc<App>,
    raw_key: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    addr: Option<SocketAddr>,
) -> Result<Response> {
    let prelude = prepare(app, raw_key, query, headers, addr).await?;

    if prelude.spec.palette {
        return serve_palette(app, &prelude).await;
    }

    let should_process = prelude.should_process();
    let (cache_key, encoding) = if should_process {
        (
            keys::processed_key(
                &prelude.object_key,
                &prelude.params,
                prelude.spec.format_str(),
            ),
            Encoding::Identity,
        )
    } else {
        let encoding = Encoding::negotiate(
            header_str(headers, &header::ACCEPT_ENCODING).unwrap_or(""),
        );
        (
            keys::original_key(&prelude.object_key, encoding),
            encoding,
        )
    };

    let etag = keys::etag(&cache_key);
    if let Some(if_none_match) = header_str(headers, &header::IF_NONE_MATCH) {
        if if_none_match.contains(&etag) {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    if let Some(data) = app.tiers.get(&cache_key).await {
        metrics::record_cache_op("hit_cache");
        let ct = if prelude.spec.blurhash {
            "text/plain"
        } else {
            content_type(&prelude.object_key, prelude.spec.format_str())
        };
        return Ok(bytes_response(data, ct, &etag));
    }

    let disk_path = keys::shard_path(&prelude.cfg.cache_dir, &cache_key);

    if let Ok(meta) = tokio::fs::metadata(&disk_path).await {
        let stale = meta
            .modified()
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .map(|age| age > prelude.cfg.soft_ttl)
            .unwrap_or(false);

        if stale {
            metrics::record_cache_op("hit_stale");
            // Fire-and-forget refresh on a detached task: cancelling this
            // request must not abort the revalidation.
            let job = MissJob::new(app, &prelude, should_process, &cache_key, &disk_path, encoding)
                .refreshing();
            let flight_app = app.clone();
            let flight_key = cache_key.clone();
            tokio::spawn(async move {
                if let Err(e) = flight_app.flight.run(&flight_key, || job.resolve()).await {
                    tracing::warn!(cache_key = %flight_key, error = %e, "background revalidation failed");
                }
            });
        } else {
            metrics::record_cache_op("hit_disk");
        }

        return file_response(&disk_path, &prelude, encoding, &etag).await;
    }

    let job = MissJob::new(app, &prelude, should_process, &cache_key, &disk_path, encoding);
    app.flight.run(&cache_key, || job.resolve()).await?;

    file_response(&disk_path, &prelude, encoding, &etag).await
}

async fn purge(
    app: &Arc<App>,
    raw_key: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    addr: Option<SocketAddr>,
) -> Result<Response> {
    let prelude = prepare(app, raw_key, query, headers, addr).await?;

    let cache_key = if prelude.should_process() {
        keys::processed_key(
            &prelude.object_key,
            &prelude.params,
            prelude.spec.format_str(),
        )
    } else {
        keys::original_key(&prelude.object_key, Encoding::Identity)
    };

    if let Err(e) = app.tiers.delete(&cache_key).await {
        tracing::warn!(cache_key = %cache_key, error = %e, "tier purge failed");
    }

    let disk_path = keys::shard_path(&prelude.cfg.cache_dir, &cache_key);
    if let Err(e) = tokio::fs::remove_file(&disk_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %disk_path.display(), error = %e, "disk purge failed");
        }
    }

    tracing::info!(object_key = %prelude.object_key, cache_key = %cache_key, "purged");
    Ok((StatusCode::OK, "Purged").into_response())
}

async fn serve_palette(app: &Arc<App>, prelude: &Prelude) -> Result<Response> {
    let cache_key = keys::processed_key(&prelude.object_key, &prelude.params, "json");

    if let Some(data) = app.tiers.get(&cache_key).await {
        metrics::record_cache_op("hit_cache");
        return Ok(bytes_response(data, "application/json", &keys::etag(&cache_key)));
    }

    let producer_app = app.clone();
    let object_key = prelude.object_key.clone();
    let max_input = prelude.cfg.max_input_size;

    let data = app
        .flight
        .run(&cache_key, || async move {
            metrics::record_cache_op("miss");
            let fetched = producer_app.origin.get(&object_key).await?;
            let raw = collect_body(fetched.body, max_input).await?;
            let colors = tokio::task::spawn_blocking(move || palette::extract_palette(&raw))
                .await
                .map_err(|e| RelayError::Transform(format!("palette task: {}", e)))??;
            let body = serde_json::to_vec(&json!({ "colors": colors }))
                .map_err(|e| RelayError::Transform(format!("palette serialize: {}", e)))?;
            Ok(Bytes::from(body))
        })
        .await?;

    if let Err(e) = app
        .tiers
        .set(&cache_key, data.clone(), prelude.cfg.soft_ttl)
        .await
    {
        tracing::warn!(cache_key = %cache_key, error = %e, "palette tier populate failed");
    }

    Ok(bytes_response(data, "application/json", &keys::etag(&cache_key)))
}

/// One coalesced miss resolution: fetch (or render) the entry, commit it to
/// disk, and populate the byte tiers for processed variants.
#[derive(Clone)]
struct MissJob {
    app: Arc<App>,
    cfg: Arc<Config>,
    object_key: String,
    spec: TransformSpec,
    encoding: Encoding,
    should_process: bool,
    is_video: bool,
    cache_key: String,
    disk_path: PathBuf,
    refresh: bool,
}

impl MissJob {
    fn new(
        app: &Arc<App>,
        prelude: &Prelude,
        should_process: bool,
        cache_key: &str,
        disk_path: &std::path::Path,
        encoding: Encoding,
    ) -> Self {
        Self {
            app: app.clone(),
            cfg: prelude.cfg.clone(),
            object_key: prelude.object_key.clone(),
            spec: prelude.spec.clone(),
            encoding,
            should_process,
            is_video: prelude.is_video,
            cache_key: cache_key.to_string(),
            disk_path: disk_path.to_path_buf(),
            refresh: false,
        }
    }

    /// Stale-while-revalidate variant: overwrite the existing entry
    /// instead of treating its presence as an answer.
    fn refreshing(mut self) -> Self {
        self.refresh = true;
        self
    }

    async fn resolve(self) -> Result<Bytes> {
        // The entry may have been committed while this caller queued.
        if !self.refresh && tokio::fs::metadata(&self.disk_path).await.is_ok() {
            metrics::record_cache_op("hit_disk");
            return Ok(Bytes::new());
        }

        if !self.refresh {
            metrics::record_cache_op("miss");
        }
        tracing::debug!(
            object_key = %self.object_key,
            cache_key = %self.cache_key,
            refresh = self.refresh,
            "resolving origin fetch"
        );

        if !self.should_process {
            let fetched = self.app.origin.get(&self.object_key).await?;
            let mut reader = fetched.body.into_async_read();
            writer::commit(&self.disk_path, &mut reader, self.encoding).await?;
            return Ok(Bytes::new());
        }

        let data = if self.is_video && self.cfg.enable_video_thumbnail {
            self.render_video().await?
        } else {
            self.render_image().await?
        };

        writer::commit(&self.disk_path, &mut data.as_slice(), Encoding::Identity).await?;

        let bytes = Bytes::from(data);
        if let Err(e) = self
            .app
            .tiers
            .set(&self.cache_key, bytes.clone(), self.cfg.soft_ttl)
            .await
        {
            tracing::warn!(cache_key = %self.cache_key, error = %e, "tier populate failed");
        }
        Ok(bytes)
    }

    async fn render_image(&self) -> Result<Vec<u8>> {
        let fetched = self.app.origin.get(&self.object_key).await?;
        if self.cfg.max_input_size > 0 && fetched.size > self.cfg.max_input_size {
            return Err(RelayError::PayloadTooLarge(self.cfg.max_input_size));
        }
        let data = collect_body(fetched.body, self.cfg.max_input_size).await?;

        let processor = self.processor(true);
        let spec = self.spec.clone();
        let object_key = self.object_key.clone();
        tokio::task::spawn_blocking(move || processor.process(&data, &spec, &object_key))
            .await
            .map_err(|e| RelayError::Transform(format!("transform task: {}", e)))?
    }

    async fn render_video(&self) -> Result<Vec<u8>> {
        // Prefer handing ffmpeg a pre-signed URL; fall back to streaming
        // the body into a temp file that dies with this scope.
        let mut tmp_guard = None;
        let input = match self.app.origin.presign(&self.object_key, PRESIGN_TTL).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = %e, "presign unavailable, downloading video");
                let fetched = self.app.origin.get(&self.object_key).await?;
                let _ = tokio::fs::create_dir_all(&self.cfg.cache_dir).await;
                let tmp = tempfile::Builder::new()
                    .prefix("imgrelay_video_")
                    .tempfile_in(&self.cfg.cache_dir)
                    .map_err(|e| RelayError::Dependency(format!("video temp file: {}", e)))?;
                let (file, path) = tmp.into_parts();
                let mut file = tokio::fs::File::from_std(file);
                let mut reader = fetched.body.into_async_read();
                tokio::io::copy(&mut reader, &mut file)
                    .await
                    .map_err(|e| RelayError::Dependency(format!("video download: {}", e)))?;
                file.shutdown()
                    .await
                    .map_err(|e| RelayError::Dependency(format!("video flush: {}", e)))?;
                let input = path.to_string_lossy().into_owned();
                tmp_guard = Some(path);
                input
            }
        };

        let result = if self.spec.animated {
            let format = if self.spec.format == Some(Format::Webp) {
                video::AnimatedFormat::Webp
            } else {
                video::AnimatedFormat::Gif
            };
            video::animated(&input, self.spec.width, self.spec.height, format).await
        } else {
            let frame = video::still_frame(&input, video::DEFAULT_TIMESTAMP).await?;
            // Extracted frames run through the image pipeline unwatermarked.
            let processor = self.processor(false);
            let spec = self.spec.clone();
            let frame_key = format!("{}.jpg", self.object_key);
            tokio::task::spawn_blocking(move || processor.process(&frame, &spec, &frame_key))
                .await
                .map_err(|e| RelayError::Transform(format!("transform task: {}", e)))?
        };

        drop(tmp_guard);
        result
    }

    fn processor(&self, with_watermark: bool) -> Processor {
        Processor {
            watermark: if with_watermark {
                self.app.watermark.get()
            } else {
                None
            },
            face_cascade: self.cfg.face_cascade_path.clone(),
            ai_model: self.cfg.ai_model_path.as_ref().map(|path| AiModelConfig {
                path: path.clone(),
                input: self.cfg.ai_model_input.clone(),
                output: self.cfg.ai_model_output.clone(),
            }),
            smart_compression: self.cfg.smart_compression,
        }
    }
}

/// Drain an origin body, enforcing the size cap mid-stream so a missing or
/// spoofed content length cannot exhaust memory.
async fn collect_body(
    body: aws_sdk_s3::primitives::ByteStream,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let mut reader = body.into_async_read();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| RelayError::Dependency(format!("origin read: {}", e)))?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if max_bytes > 0 && buf.len() as u64 > max_bytes {
            return Err(RelayError::PayloadTooLarge(max_bytes));
        }
    }
    Ok(buf)
}

async fn file_response(
    path: &std::path::Path,
    prelude: &Prelude,
    encoding: Encoding,
    etag: &str,
) -> Result<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| RelayError::Dependency(format!("cache entry open: {}", e)))?;
    writer::touch(path);

    let ct = if prelude.spec.blurhash {
        "text/plain"
    } else {
        content_type(&prelude.object_key, prelude.spec.format_str())
    };

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    apply_asset_headers(response.headers_mut(), ct, etag, encoding);
    Ok(response)
}

fn bytes_response(data: Bytes, content_type: &'static str, etag: &str) -> Response {
    let mut response = Response::new(Body::from(data));
    apply_asset_headers(response.headers_mut(), content_type, etag, Encoding::Identity);
    response
}

fn apply_asset_headers(
    headers: &mut HeaderMap,
    content_type: &'static str,
    etag: &str,
    encoding: Encoding,
) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    match encoding {
        Encoding::Brotli => {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        }
        Encoding::Gzip => {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        Encoding::Identity => {}
    }
}

async fn error_response(app: &App, err: RelayError, key: &str, request_id: &str) -> Response {
    if matches!(err, RelayError::NotFound(_)) {
        let cfg = app.config.snapshot();
        if let Some(path) = &cfg.default_image_path {
            if let Ok(data) = tokio::fs::read(path).await {
                let ct = content_type(&path.to_string_lossy(), "");
                let mut response = Response::new(Body::from(data));
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
                return response;
            }
        }
    }

    if err.status().is_server_error() {
        tracing::error!(
            kind = err.kind(),
            error = %err,
            key = %key,
            request_id = %request_id,
            "request failed"
        );
    } else {
        tracing::warn!(
            kind = err.kind(),
            error = %err,
            key = %key,
            request_id = %request_id,
            "request rejected"
        );
    }
    err.into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn country_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("cf-ipcountry")
        .or_else(|| headers.get("x-country-code"))
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation_rejects_traversal_and_dotfiles() {
        assert!(validate_key("img/a.jpg").is_ok());
        assert!(validate_key("/img/a.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a/../secret").is_err());
        assert!(validate_key(".env").is_err());
        assert!(validate_key("img/.hidden/a.jpg").is_err());
    }
}
