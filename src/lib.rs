use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod guard;
pub mod handler;
pub mod keys;
pub mod metrics;
pub mod signature;
pub mod storage;
pub mod telemetry;
pub mod transform;
pub mod watermark;
pub mod writer;

pub use handler::App;

/// Crate-wide error taxonomy. Every component surfaces one of these kinds;
/// the handler maps kinds to response status codes. Variants carry plain
/// strings so results can be cloned across coalesced waiters.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("too many requests")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("payload exceeds limit of {0} bytes")]
    PayloadTooLarge(u64),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("dependency error: {0}")]
    Dependency(String),
    #[error("request cancelled or timed out: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Transient(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable kind label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::RateLimited => "rate_limited",
            RelayError::NotFound(_) => "not_found",
            RelayError::PayloadTooLarge(_) => "payload_too_large",
            RelayError::Transform(_) => "transform",
            RelayError::Dependency(_) => "dependency",
            RelayError::Transient(_) => "transient",
        }
    }

    /// Status text served to clients. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "Invalid Request",
            RelayError::Unauthorized(_) => "Forbidden",
            RelayError::RateLimited => "Too Many Requests",
            RelayError::NotFound(_) => "Not Found",
            RelayError::PayloadTooLarge(_) => "Payload Too Large",
            RelayError::Transform(_) | RelayError::Dependency(_) => "Internal Server Error",
            RelayError::Transient(_) => "Gateway Timeout",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

/// Build the HTTP surface: asset retrieval and purge on the wildcard route,
/// plus health and metrics probes.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route("/metrics", get(handler::metrics_exposition))
        .route("/", get(handler::reject_root).delete(handler::reject_root))
        .route(
            "/*key",
            get(handler::fetch_asset).delete(handler::purge_asset),
        )
        .layer(middleware::from_fn_with_state(
            app.clone(),
            metrics::track_http,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(handler::propagate_request_id))
        .with_state(app)
}
