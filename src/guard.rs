use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use redis::aio::ConnectionManager;
use std::num::NonZeroU32;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::{RelayError, Result};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Access checks evaluated before any request work, in order: CIDR
/// allowlist, domain allowlist, country allowlist. A CIDR match marks the
/// peer as trusted and bypasses the domain check; if only CIDRs are
/// configured and the peer does not match, the request is rejected.
pub fn check_access(
    cfg: &Config,
    ip: &str,
    referer: Option<&str>,
    origin: Option<&str>,
    country: Option<&str>,
) -> Result<()> {
    let ip_allowed = !cfg.allowed_cidrs.is_empty()
        && ip
            .parse::<std::net::IpAddr>()
            .map(|addr| cfg.allowed_cidrs.iter().any(|net| net.contains(&addr)))
            .unwrap_or(false);

    if !ip_allowed && !cfg.allowed_domains.is_empty() {
        let matches = |value: Option<&str>| {
            value
                .and_then(host_of)
                .map(|host| domain_allowed(cfg, host))
                .unwrap_or(false)
        };

        // With neither header present there is nothing to enforce against.
        if referer.is_some() || origin.is_some() {
            if !matches(referer) && !matches(origin) {
                return Err(RelayError::Unauthorized("forbidden domain".into()));
            }
        }
    } else if !ip_allowed && !cfg.allowed_cidrs.is_empty() {
        return Err(RelayError::Unauthorized("forbidden ip".into()));
    }

    if !cfg.allowed_countries.is_empty() {
        if let Some(code) = country.filter(|c| !c.is_empty()) {
            let allowed = cfg
                .allowed_countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(code));
            if !allowed {
                return Err(RelayError::Unauthorized("forbidden country".into()));
            }
        }
    }

    Ok(())
}

fn domain_allowed(cfg: &Config, host: &str) -> bool {
    for entry in &cfg.allowed_domains {
        if entry == "*" {
            return true;
        }
        if !entry.starts_with('^') && entry == host {
            return true;
        }
    }
    cfg.domain_patterns.iter().any(|re| re.is_match(host))
}

/// Host component of a Referer/Origin value, port included.
fn host_of(value: &str) -> Option<&str> {
    let rest = match value.find("://") {
        Some(idx) => &value[idx + 3..],
        None => value,
    };
    let host = rest.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Per-IP sliding-window rate limiter, either process-local or shared
/// through Redis.
pub enum Limiter {
    Local(LocalLimiter),
    Shared(SharedLimiter),
}

impl Limiter {
    pub async fn allow(&self, ip: &str) -> bool {
        match self {
            Limiter::Local(l) => l.allow(ip),
            Limiter::Shared(l) => l.allow(ip).await,
        }
    }

    /// Drop idle per-key state so the local map stays bounded.
    pub fn retain_recent(&self) {
        if let Limiter::Local(l) = self {
            l.inner.retain_recent();
        }
    }
}

/// In-process token-bucket map: rate = limit/sec, burst = limit.
pub struct LocalLimiter {
    inner: KeyedLimiter,
}

impl LocalLimiter {
    pub fn new(limit: u32) -> Self {
        let per_second = NonZeroU32::new(limit.max(1)).expect("non-zero rate");
        Self {
            inner: RateLimiter::keyed(Quota::per_second(per_second)),
        }
    }

    pub fn allow(&self, ip: &str) -> bool {
        self.inner.check_key(&ip.to_string()).is_ok()
    }
}

/// Distributed sliding window over a Redis sorted set, executed atomically
/// by a server-side script. Transport errors fail open: rate limiting must
/// not take the service down with it.
pub struct SharedLimiter {
    conn: ConnectionManager,
    script: redis::Script,
    limit: u32,
}

const WINDOW_MICROS: i64 = 1_000_000;
const WINDOW_MILLIS: i64 = 1_000;

const SLIDING_WINDOW_LUA: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, tonumber(ARGV[1]) - tonumber(ARGV[3]))
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[1])
    redis.call('PEXPIRE', KEYS[1], ARGV[4])
    return 1
end
return 0
"#;

impl SharedLimiter {
    pub async fn connect(addr: &str, password: &str, db: i64, limit: u32) -> Result<Self> {
        let auth = if password.is_empty() {
            String::new()
        } else {
            format!(":{}@", password)
        };
        let client = redis::Client::open(format!("redis://{}{}/{}", auth, addr, db))
            .map_err(|e| RelayError::Dependency(format!("rate limiter client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RelayError::Dependency(format!("rate limiter connect: {}", e)))?;
        Ok(Self {
            conn,
            script: redis::Script::new(SLIDING_WINDOW_LUA),
            limit,
        })
    }

    pub async fn allow(&self, ip: &str) -> bool {
        let now_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = self
            .script
            .key(format!("ratelimit:{}", ip))
            .arg(now_micros)
            .arg(self.limit)
            .arg(WINDOW_MICROS)
            .arg(WINDOW_MILLIS)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(allowed) => allowed == 1,
            Err(e) => {
                tracing::warn!(error = %e, "shared rate limiter unreachable, failing open");
                true
            }
        }
    }
}
