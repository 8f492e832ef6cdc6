//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Tests the full Axum router (middleware + handlers) without binding a TCP
//! listener. Everything here fails before reaching any upstream, so no
//! network stubs are needed.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use hlsgate::config::Config;
use hlsgate::server::build_router;
use tower::ServiceExt;

/// Build a test config with throttling disabled unless a test opts in.
fn test_config() -> Config {
    Config {
        rate_limit_max_requests: 0,
        ..Config::default()
    }
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// ── CORS preflight ──────────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_returns_204_with_cors_on_any_path() {
    let app = build_router(test_config()).await;

    for path in ["/m3u8-proxy", "/ts-proxy", "/anything/else"] {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT, "path {path}");
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            resp.headers().get("access-control-max-age").unwrap(),
            "86400"
        );
        assert_eq!(
            resp.headers()
                .get("access-control-allow-credentials")
                .unwrap(),
            "false"
        );
    }
}

// ── Error envelopes ─────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_url_is_400_url_malformed() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/m3u8-proxy")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = json_body(resp).await;
    assert_eq!(json["code"], "URL_MALFORMED");
    assert!(json["message"].is_string());
    assert!(json["hint"].is_string());
}

#[tokio::test]
async fn smuggled_url_is_rejected() {
    let app = build_router(test_config()).await;

    let inner = urlencoding::encode("https://internal.host/admin?x=1");
    let inner_url = format!("https://cdn.example.com/a.m3u8?next={inner}");
    let outer = urlencoding::encode(&inner_url);
    let req = Request::builder()
        .uri(format!("/m3u8-proxy?url={outer}"))
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["code"], "URL_MALFORMED");
}

#[tokio::test]
async fn non_http_scheme_is_rejected() {
    let app = build_router(test_config()).await;

    let url = urlencoding::encode("file:///etc/passwd");
    let req = Request::builder()
        .uri(format!("/ts-proxy?url={url}"))
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disallowed_host_is_403_with_host_field() {
    let mut config = test_config();
    config.host_allowlist = vec!["allowed.example".to_string()];
    let app = build_router(config).await;

    let url = urlencoding::encode("https://blocked.example/a.m3u8");
    let req = Request::builder()
        .uri(format!("/m3u8-proxy?url={url}"))
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let json = json_body(resp).await;
    assert_eq!(json["code"], "HOST_NOT_ALLOWED");
    assert_eq!(json["host"], "blocked.example");
}

#[tokio::test]
async fn error_responses_carry_cors() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/m3u8-proxy")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn resolve_without_body_is_400() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/resolve")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_ip_target_is_blocked_by_default() {
    let app = build_router(test_config()).await;

    let url = urlencoding::encode("http://169.254.169.254/latest/meta-data/");
    let req = Request::builder()
        .uri(format!("/ts-proxy?url={url}"))
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await["code"], "HOST_NOT_ALLOWED");
}

// ── Throttling ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn throttler_rejects_with_retry_after() {
    let mut config = test_config();
    config.rate_limit_max_requests = 3;
    let app = build_router(config).await;

    // Use an invalid-url request: it still passes the throttler first.
    for _ in 0..3 {
        let req = Request::builder()
            .uri("/m3u8-proxy")
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    let req = Request::builder()
        .uri("/m3u8-proxy")
        .header("x-forwarded-for", "198.51.100.7")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let json = json_body(resp).await;
    assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
    assert!(json["retryAfter"].is_u64());
    assert!(json["retryAfter"].as_u64().unwrap() <= 60);
}

#[tokio::test]
async fn throttler_keys_on_forwarded_client() {
    let mut config = test_config();
    config.rate_limit_max_requests = 1;
    let app = build_router(config).await;

    for client in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
        let req = Request::builder()
            .uri("/m3u8-proxy")
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_ne!(
            resp.status(),
            StatusCode::TOO_MANY_REQUESTS,
            "fresh client {client} should not be throttled"
        );
    }
}

#[tokio::test]
async fn preflight_bypasses_throttler() {
    let mut config = test_config();
    config.rate_limit_max_requests = 1;
    let app = build_router(config).await;

    for _ in 0..5 {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/m3u8-proxy")
            .header("x-forwarded-for", "198.51.100.9")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}

// ── Status and metrics surface ──────────────────────────────────────────────

#[tokio::test]
async fn status_reports_derived_server_url() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/proxy/status")
        .header("host", "proxy.example.com")
        .header("x-forwarded-proto", "https")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["serverUrl"], "https://proxy.example.com");
    assert_eq!(json["protocol"], "https");
    assert_eq!(json["host"], "proxy.example.com");
    assert_eq!(json["xForwardedProto"], "https");
    assert!(json["timestamp"].is_u64());
    assert!(json["userAgent"].is_string());
}

#[tokio::test]
async fn metrics_snapshot_starts_empty_and_resets() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/proxy/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["global"]["requests"], 0);
    assert_eq!(json["cache_hits"], 0);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/proxy/metrics/reset")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["reset"], true);
}

// ── 404 for unknown routes ──────────────────────────────────────────────────

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/nonexistent")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
