use axum::body::Body;
use axum::http::{Request, StatusCode};
use imgrelay::config::Config;
use imgrelay::keys::{self, Encoding};
use imgrelay::signature::sign;
use imgrelay::{router, App};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::util::ServiceExt;

/// Router against a throwaway cache dir and an unreachable origin. Tests
/// exercise the orchestrator through pre-seeded disk entries so no request
/// here depends on a live bucket.
async fn test_app(mutate: impl FnOnce(&mut Config)) -> (Arc<App>, axum::Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config {
        s3_endpoint: Some("http://127.0.0.1:9".into()),
        s3_bucket: "assets".into(),
        s3_access_key: "test".into(),
        s3_secret_key: "test".into(),
        cache_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    mutate(&mut cfg);
    let app = App::new(cfg).await;
    let routes = router(app.clone());
    (app, routes, dir)
}

fn seed_entry(dir: &std::path::Path, key: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = keys::shard_path(dir, key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn invalid_paths_are_rejected() {
    let (_, routes, _dir) = test_app(|_| {}).await;

    for uri in ["/", "/a/../b.jpg", "/.env", "/img/.hidden.jpg"] {
        let response = routes.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
    }
}

#[tokio::test]
async fn passthrough_disk_hit_is_served() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    let response = routes.oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert_eq!(
        response.headers().get("etag").unwrap().to_str().unwrap(),
        keys::etag(&key)
    );
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=86400"
    );
    assert_eq!(body_bytes(response).await, b"jpeg-bytes");
}

#[tokio::test]
async fn if_none_match_returns_304_without_io() {
    let (_, routes, _dir) = test_app(|_| {}).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    let request = Request::builder()
        .uri("/img/a.jpg")
        .header("If-None-Match", keys::etag(&key))
        .body(Body::empty())
        .unwrap();

    let response = routes.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn missing_signature_is_forbidden() {
    let (_, routes, _dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let response = routes.oneshot(get("/img/a.jpg?w=200")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_signature_is_forbidden() {
    let (_, routes, _dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let response = routes
        .oneshot(get("/img/a.jpg?w=200&s=deadbeef"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn expired_signature_is_forbidden_even_with_valid_mac() {
    let (_, routes, _dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let mut params = BTreeMap::new();
    params.insert("expires".to_string(), "1000000000".to_string());
    let sig = sign("/img/a.jpg", &params, "k");

    let response = routes
        .oneshot(get(&format!("/img/a.jpg?expires=1000000000&s={}", sig)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_expires_is_forbidden() {
    let (_, routes, _dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let response = routes
        .oneshot(get("/img/a.jpg?expires=soon&s=00"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signed_variant_is_served_from_disk() {
    let (_, routes, dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let mut params = BTreeMap::new();
    params.insert("w".to_string(), "200".to_string());
    params.insert("h".to_string(), "100".to_string());
    let sig = sign("/img/a.jpg", &params, "k");

    // The cache key excludes the signature and, with no Accept header,
    // carries an empty negotiated format.
    params.insert("s".to_string(), sig.clone());
    let key = keys::processed_key("img/a.jpg", &params, "");
    seed_entry(dir.path(), &key, b"resized-bytes");

    let response = routes
        .oneshot(get(&format!("/img/a.jpg?w=200&h=100&s={}", sig)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"resized-bytes");
}

#[tokio::test]
async fn accept_header_negotiates_webp_variant() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let mut params = BTreeMap::new();
    params.insert("w".to_string(), "10".to_string());
    let key = keys::processed_key("img/a.png", &params, "webp");
    seed_entry(dir.path(), &key, b"webp-bytes");

    let request = Request::builder()
        .uri("/img/a.png?w=10")
        .header("Accept", "image/webp,*/*")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/webp"
    );
    assert_eq!(body_bytes(response).await, b"webp-bytes");
}

#[tokio::test]
async fn accept_header_prefers_avif_over_webp() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let mut params = BTreeMap::new();
    params.insert("w".to_string(), "10".to_string());
    let key = keys::processed_key("img/a.png", &params, "avif");
    seed_entry(dir.path(), &key, b"avif-bytes");

    let request = Request::builder()
        .uri("/img/a.png?w=10")
        .header("Accept", "image/avif,image/webp,*/*")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/avif"
    );
}

#[tokio::test]
async fn purge_removes_the_disk_entry() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    let path = seed_entry(dir.path(), &key, b"jpeg-bytes");

    let request = Request::builder()
        .method("DELETE")
        .uri("/img/a.jpg")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"Purged");
    assert!(!path.exists());
}

#[tokio::test]
async fn rate_limit_rejects_the_second_request() {
    let (_, routes, dir) = test_app(|cfg| cfg.rate_limit = 1).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    let first = routes.clone().oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = routes.oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn stale_entry_is_served_immediately() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    let path = seed_entry(dir.path(), &key, b"stale-bytes");

    // Three days old, well past the default soft TTL of one day.
    let past = filetime::FileTime::from_unix_time(
        filetime::FileTime::now().unix_seconds() - 3 * 24 * 3600,
        0,
    );
    filetime::set_file_times(&path, past, past).unwrap();

    let response = routes.oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"stale-bytes");
}

#[tokio::test]
async fn domain_allowlist_enforced_for_foreign_referers() {
    let (_, routes, dir) = test_app(|cfg| {
        cfg.allowed_domains = vec!["example.com".to_string()];
    })
    .await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    let forbidden = Request::builder()
        .uri("/img/a.jpg")
        .header("Referer", "https://evil.com/page")
        .body(Body::empty())
        .unwrap();
    let response = routes.clone().oneshot(forbidden).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let allowed = Request::builder()
        .uri("/img/a.jpg")
        .header("Referer", "https://example.com/page")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(allowed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn country_allowlist_enforced_when_header_present() {
    let (_, routes, dir) = test_app(|cfg| {
        cfg.allowed_countries = vec!["US".to_string()];
    })
    .await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    let foreign = Request::builder()
        .uri("/img/a.jpg")
        .header("CF-IPCountry", "RU")
        .body(Body::empty())
        .unwrap();
    let response = routes.clone().oneshot(foreign).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // No header: nothing to enforce against.
    let response = routes.oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_hidden_unless_enabled() {
    let (_, routes, _dir) = test_app(|_| {}).await;
    let response = routes.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (_, routes, _dir) = test_app(|cfg| cfg.enable_metrics = true).await;
    let response = routes.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_a_correlation_id() {
    let (_, routes, dir) = test_app(|_| {}).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    // A fresh ID is minted when the caller supplies none.
    let response = routes.clone().oneshot(get("/img/a.jpg")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));

    // An incoming ID is honoured and echoed back.
    let request = Request::builder()
        .uri("/img/a.jpg")
        .header("X-Request-Id", "req-1234")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-1234"
    );
}

#[tokio::test]
async fn unsigned_requests_without_params_bypass_signature() {
    let (_, routes, dir) = test_app(|cfg| cfg.secret_key = Some("k".into())).await;

    let key = keys::original_key("img/a.jpg", Encoding::Identity);
    seed_entry(dir.path(), &key, b"jpeg-bytes");

    // Raw fetches are free by design: no params, no signature required.
    let response = routes.oneshot(get("/img/a.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
