use arc_swap::ArcSwap;
use ipnet::IpNet;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Immutable configuration snapshot. Loaded from the environment at
/// startup; a SIGHUP reload builds a fresh snapshot and swaps it into the
/// [`ConfigHandle`] so in-flight requests keep a consistent view.
#[derive(Debug, Clone)]
pub struct Config {
    // Origin store
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_backup_bucket: Option<String>,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_force_path_style: bool,
    pub s3_use_custom_domain: bool,

    // Server
    pub port: u16,
    pub debug: bool,

    // Disk cache
    pub cache_dir: PathBuf,
    /// Stale-while-revalidate boundary: entries older than this are served
    /// stale while a background refresh runs.
    pub soft_ttl: Duration,
    /// Garbage-collection boundary for the cleaner.
    pub hard_ttl: Duration,
    pub cleanup_interval: Duration,

    // URL signing
    pub secret_key: Option<String>,

    // Watermark
    pub watermark_path: Option<PathBuf>,
    pub watermark_opacity: f32,

    // Limits
    pub max_input_size: u64,

    // Observability
    pub enable_metrics: bool,
    pub otlp_endpoint: Option<String>,

    // Access control
    pub allowed_domains: Vec<String>,
    pub domain_patterns: Vec<Regex>,
    pub allowed_cidrs: Vec<IpNet>,
    pub allowed_countries: Vec<String>,
    /// Requests per second per client IP; 0 disables rate limiting.
    pub rate_limit: u32,

    // Transform features
    pub enable_video_thumbnail: bool,
    pub face_cascade_path: Option<PathBuf>,
    pub ai_model_path: Option<PathBuf>,
    pub ai_model_input: String,
    pub ai_model_output: String,
    pub presets: HashMap<String, String>,
    pub default_image_path: Option<PathBuf>,
    pub smart_compression: bool,

    // Memory cache tier
    pub memory_cache_size: u64,
    pub memory_cache_limit_bytes: u64,

    // Remote cache tier
    pub redis_addrs: Vec<String>,
    pub redis_password: String,
    pub redis_db: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            s3_endpoint: None,
            s3_region: "auto".into(),
            s3_bucket: String::new(),
            s3_backup_bucket: None,
            s3_access_key: String::new(),
            s3_secret_key: String::new(),
            s3_force_path_style: false,
            s3_use_custom_domain: false,
            port: 8080,
            debug: false,
            cache_dir: PathBuf::from("./cache_data"),
            soft_ttl: Duration::from_secs(24 * 3600),
            hard_ttl: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            secret_key: None,
            watermark_path: None,
            watermark_opacity: 0.5,
            max_input_size: 20 * 1024 * 1024,
            enable_metrics: false,
            otlp_endpoint: None,
            allowed_domains: Vec::new(),
            domain_patterns: Vec::new(),
            allowed_cidrs: Vec::new(),
            allowed_countries: Vec::new(),
            rate_limit: 0,
            enable_video_thumbnail: false,
            face_cascade_path: None,
            ai_model_path: None,
            ai_model_input: "images".into(),
            ai_model_output: "output0".into(),
            presets: HashMap::new(),
            default_image_path: None,
            smart_compression: false,
            memory_cache_size: 100,
            memory_cache_limit_bytes: 0,
            redis_addrs: Vec::new(),
            redis_password: String::new(),
            redis_db: 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required origin configuration: S3_BUCKET, S3_ACCESS_KEY and S3_SECRET_KEY must be set")]
    MissingOrigin,
    #[error("invalid PORT value")]
    InvalidPort,
}

impl Config {
    /// Read every recognised key from the environment. Unparseable values
    /// fall back to their defaults; only the origin credentials are hard
    /// requirements, enforced by [`Config::validate`].
    pub fn from_env() -> Self {
        let soft_ttl = Duration::from_secs(env_u64("CACHE_TTL_HOURS", 24) * 3600);
        let hard_ttl = match std::env::var("CACHE_HARD_TTL_HOURS") {
            Ok(v) => Duration::from_secs(v.parse::<u64>().unwrap_or(24 * 7) * 3600),
            Err(_) => soft_ttl * 7,
        };

        let allowed_domains = env_list("ALLOWED_DOMAINS");
        let domain_patterns = allowed_domains
            .iter()
            .filter(|d| d.starts_with('^'))
            .filter_map(|d| Regex::new(d).ok())
            .collect();

        Self {
            s3_endpoint: env_opt("S3_ENDPOINT"),
            s3_region: env_or("S3_REGION", "auto"),
            s3_bucket: env_or("S3_BUCKET", ""),
            s3_backup_bucket: env_opt("S3_BACKUP_BUCKET"),
            s3_access_key: env_or("S3_ACCESS_KEY", ""),
            s3_secret_key: env_or("S3_SECRET_KEY", ""),
            s3_force_path_style: env_bool("S3_FORCE_PATH_STYLE", false),
            s3_use_custom_domain: env_bool("S3_USE_CUSTOM_DOMAIN", false),
            port: env_u64("PORT", 8080) as u16,
            debug: env_bool("DEBUG", false),
            cache_dir: PathBuf::from(env_or("CACHE_DIR", "./cache_data")),
            soft_ttl,
            hard_ttl,
            cleanup_interval: Duration::from_secs(env_u64("CLEANUP_INTERVAL_MINS", 60) * 60),
            secret_key: env_opt("SECRET_KEY"),
            watermark_path: env_opt("WATERMARK_PATH").map(PathBuf::from),
            watermark_opacity: env_f32("WATERMARK_OPACITY", 0.5),
            max_input_size: env_u64("MAX_IMAGE_SIZE_MB", 20) * 1024 * 1024,
            enable_metrics: env_bool("ENABLE_METRICS", false),
            otlp_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
            allowed_domains,
            domain_patterns,
            allowed_cidrs: env_list("ALLOWED_CIDRS")
                .iter()
                .filter_map(|c| c.parse::<IpNet>().ok())
                .collect(),
            allowed_countries: env_list("ALLOWED_COUNTRIES"),
            rate_limit: env_u64("RATE_LIMIT", 0) as u32,
            enable_video_thumbnail: env_bool("ENABLE_VIDEO_THUMBNAIL", false),
            face_cascade_path: env_opt("FACE_CASCADE_PATH").map(PathBuf::from),
            ai_model_path: env_opt("AI_MODEL_PATH").map(PathBuf::from),
            ai_model_input: env_or("AI_MODEL_INPUT_NAME", "images"),
            ai_model_output: env_or("AI_MODEL_OUTPUT_NAME", "output0"),
            presets: env_map("PRESETS"),
            default_image_path: env_opt("DEFAULT_IMAGE_PATH").map(PathBuf::from),
            smart_compression: env_bool("SMART_COMPRESSION", false),
            memory_cache_size: env_u64("MEMORY_CACHE_SIZE", 100),
            memory_cache_limit_bytes: env_u64("MEMORY_CACHE_LIMIT_BYTES", 0),
            redis_addrs: env_list("REDIS_ADDR"),
            redis_password: env_or("REDIS_PASSWORD", ""),
            redis_db: env_u64("REDIS_DB", 0) as i64,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.s3_bucket.is_empty()
            || self.s3_access_key.is_empty()
            || self.s3_secret_key.is_empty()
        {
            return Err(ConfigError::MissingOrigin);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

/// Shared handle over the current configuration snapshot. Readers load a
/// consistent `Arc<Config>` per request; the reload task swaps in a new one.
pub struct ConfigHandle(ArcSwap<Config>);

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self(ArcSwap::from_pointee(config))
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.0.load_full()
    }

    pub fn replace(&self, config: Config) {
        self.0.store(Arc::new(config));
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_bool(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_f32(key: &str, fallback: f32) -> f32 {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_list(key: &str) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn env_map(key: &str) -> HashMap<String, String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => serde_json::from_str(&v).unwrap_or_default(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_origin() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());

        let cfg = Config {
            s3_bucket: "assets".into(),
            s3_access_key: "ak".into(),
            s3_secret_key: "sk".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn handle_swaps_snapshots() {
        let handle = ConfigHandle::new(Config::default());
        assert_eq!(handle.snapshot().rate_limit, 0);

        let mut updated = Config::default();
        updated.rate_limit = 5;
        handle.replace(updated);
        assert_eq!(handle.snapshot().rate_limit, 5);
    }
}
