//! End-to-end tests: a real proxy server on a random port talking to a stub
//! upstream server on another random port.
//!
//! The default policy blocks private-range IP literals (SSRF), so every
//! proxy config here allowlists `127.0.0.1` explicitly (the operator
//! override) to let the proxy reach the stub.

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::time::Duration;

use hlsgate::config::Config;
use hlsgate::server::build_router;

// ── Stub upstream ─────────────────────────────────────────────────────────────

const SEGMENT_BYTES: usize = 5000;

fn stub_router() -> Router {
    Router::new()
        .route("/m/root.m3u8", get(stub_manifest))
        .route("/m/secret.m3u8", get(stub_forbidden))
        .route("/m/gone.m3u8", get(stub_not_found))
        .route("/m/slow.m3u8", get(stub_slow))
        .route("/seg/data.ts", get(stub_segment))
        .route("/p.m3u8", get(stub_simple_manifest))
        .route("/sub/en.vtt", get(stub_subtitle))
}

async fn stub_manifest() -> Response {
    let body = "#EXTM3U\n\
                #EXT-X-VERSION:3\n\
                #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"audio/en.m3u8\"\n\
                #EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\n\
                #EXT-X-TARGETDURATION:6\n\
                #EXTINF:6.0,\n\
                seg1.ts\n\
                sub.m3u8\n";
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response()
}

async fn stub_simple_manifest() -> Response {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        "#EXTM3U\n#EXT-X-ENDLIST\n",
    )
        .into_response()
}

async fn stub_forbidden() -> Response {
    StatusCode::FORBIDDEN.into_response()
}

async fn stub_not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

async fn stub_slow() -> Response {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "#EXTM3U\n".into_response()
}

async fn stub_subtitle() -> Response {
    "WEBVTT\n\n00:00.000 --> 00:01.000\nhi\n".into_response()
}

/// Byte-range aware segment endpoint: `Range: bytes=a-b` yields 206 with a
/// proper `Content-Range`, otherwise the full body.
async fn stub_segment(headers: HeaderMap) -> Response {
    let body = vec![0x47u8; SEGMENT_BYTES];

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    match range {
        Some((start, end)) => {
            let end = end.min(SEGMENT_BYTES - 1);
            let slice = body[start..=end].to_vec();
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, "video/mp2t")
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{SEGMENT_BYTES}"),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_LENGTH, slice.len())
                .body(Body::from(slice))
                .unwrap()
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp2t")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

// ── Test servers ──────────────────────────────────────────────────────────────

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn proxy_config() -> Config {
    Config {
        host_allowlist: vec!["127.0.0.1".to_string()],
        rate_limit_max_requests: 0,
        ..Config::default()
    }
}

async fn start_stub() -> SocketAddr {
    serve(stub_router()).await
}

async fn start_proxy(config: Config) -> SocketAddr {
    serve(build_router(config).await).await
}

fn enc(s: impl AsRef<str>) -> String {
    urlencoding::encode(s.as_ref()).into_owned()
}

// ── Manifest rewriting ────────────────────────────────────────────────────────

#[tokio::test]
async fn manifest_is_rewritten_through_proxy() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let upstream = format!("http://{stub}/m/root.m3u8");
    let resp = client
        .get(format!("http://{proxy}/m3u8-proxy?url={}", enc(&upstream)))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");

    let body = resp.text().await.unwrap();
    let base = format!("http://{proxy}");

    // Nested playlist and segment lines point back at the proxy.
    assert!(body.contains(&format!(
        "{base}/m3u8-proxy?url={}",
        enc(format!("http://{stub}/m/sub.m3u8"))
    )));
    assert!(body.contains(&format!(
        "{base}/ts-proxy?url={}",
        enc(format!("http://{stub}/m/seg1.ts"))
    )));
    // Key and alternate-audio URIs too.
    assert!(body.contains(&format!(
        "URI=\"{base}/ts-proxy?url={}\"",
        enc(format!("http://{stub}/m/k.key"))
    )));
    assert!(body.contains(&format!(
        "URI=\"{base}/m3u8-proxy?url={}\"",
        enc(format!("http://{stub}/m/audio/en.m3u8"))
    )));
    // Plain tags survive untouched.
    assert!(body.contains("#EXT-X-TARGETDURATION:6"));
}

#[tokio::test]
async fn second_fetch_hits_cache() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let url = format!(
        "http://{proxy}/m3u8-proxy?url={}",
        enc(format!("http://{stub}/m/root.m3u8"))
    );

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    let first_body = first.text().await.unwrap();

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    let second_body = second.text().await.unwrap();

    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn post_manifest_propagates_headers_into_rewrite() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{proxy}/m3u8-proxy"))
        .json(&serde_json::json!({
            "url": format!("http://{stub}/m/root.m3u8"),
            "headers": {"Referer": "https://site.example/"},
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    for line in body.split('\n') {
        if line.contains("/ts-proxy?url=") || line.contains("/m3u8-proxy?url=") {
            assert!(
                line.contains("&headers="),
                "rewritten line missing headers param: {line}"
            );
        }
    }
}

#[tokio::test]
async fn hls_alias_uses_link_parameter() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/proxy/hls?link={}",
            enc(format!("http://{stub}/m/root.m3u8"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("/ts-proxy?url="));
}

#[tokio::test]
async fn rewritten_manifest_remains_valid_hls() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc(format!("http://{stub}/m/root.m3u8"))
        ))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    match m3u8_rs::parse_playlist_res(body.as_bytes()) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
            assert!(!media.segments.is_empty());
        }
        other => panic!("rewritten manifest no longer parses: {other:?}"),
    }
}

// ── Upstream error mapping ────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_403_surfaces_as_403_with_code() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc(format!("http://{stub}/m/secret.m3u8"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 403);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "UPSTREAM_403");
    assert_eq!(json["host"], "127.0.0.1");
}

#[tokio::test]
async fn upstream_404_surfaces_as_not_found() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc(format!("http://{stub}/m/gone.m3u8"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    // Nothing listens on this port.
    let resp = client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc("http://127.0.0.1:9/void.m3u8")
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "BAD_GATEWAY");
}

#[tokio::test]
async fn slow_upstream_times_out_as_504() {
    let stub = start_stub().await;
    let mut config = proxy_config();
    config.upstream_timeout = Duration::from_millis(300);
    config.request_timeout = Duration::from_millis(800);
    let proxy = start_proxy(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc(format!("http://{stub}/m/slow.m3u8"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 504);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "TIMEOUT");
}

// ── Segment streaming ─────────────────────────────────────────────────────────

#[tokio::test]
async fn range_request_passes_through() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/ts-proxy?url={}",
            enc(format!("http://{stub}/seg/data.ts"))
        ))
        .header("range", "bytes=0-1023")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 206);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 0-1023/5000"
    );
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(
        resp.headers().get("access-control-expose-headers").unwrap(),
        "Content-Length, Content-Range, Accept-Ranges, Content-Type"
    );

    let body = resp.bytes().await.unwrap();
    assert_eq!(body.len(), 1024);
}

#[tokio::test]
async fn full_segment_stream_defaults_content_type() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/ts-proxy?url={}",
            enc(format!("http://{stub}/seg/data.ts"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "video/mp2t");
    assert_eq!(resp.bytes().await.unwrap().len(), SEGMENT_BYTES);
}

#[tokio::test]
async fn enabled_segment_cache_serves_repeat_hits() {
    let stub = start_stub().await;
    let mut config = proxy_config();
    config.segment_cache_enabled = true;
    let proxy = start_proxy(config).await;
    let client = reqwest::Client::new();

    let url = format!(
        "http://{proxy}/ts-proxy?url={}",
        enc(format!("http://{stub}/seg/data.ts"))
    );

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().get("x-cache").is_none());
    first.bytes().await.unwrap();

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(second.bytes().await.unwrap().len(), SEGMENT_BYTES);
}

// ── Subtitles ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn subtitles_get_vtt_default_and_public_caching() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{proxy}/sub-proxy?url={}",
            enc(format!("http://{stub}/sub/en.vtt"))
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert!(resp.text().await.unwrap().starts_with("WEBVTT"));
}

// ── Resolver ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resolver_picks_allowed_alternative() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let ok_url = format!("http://{stub}/p.m3u8");
    let input = format!("https://blocked.example/x.m3u8 or {ok_url}");

    let resp = client
        .post(format!("http://{proxy}/resolve"))
        .json(&serde_json::json!({"url": input}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["resolved"], true);
    assert_eq!(json["url"], ok_url);
}

#[tokio::test]
async fn resolver_unwraps_json_envelopes() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let ok_url = format!("http://{stub}/p.m3u8");
    let envelope = serde_json::json!({"source": "nope", "url": ok_url}).to_string();

    let resp = client
        .post(format!("http://{proxy}/resolve"))
        .json(&serde_json::json!({"url": envelope}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["url"], ok_url);
}

#[tokio::test]
async fn resolver_rejects_inputs_without_urls() {
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{proxy}/resolve"))
        .json(&serde_json::json!({"url": "no urls in here"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "URL_MALFORMED");
}

// ── Metrics after traffic ─────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_reflect_served_requests() {
    let stub = start_stub().await;
    let proxy = start_proxy(proxy_config()).await;
    let client = reqwest::Client::new();

    client
        .get(format!(
            "http://{proxy}/m3u8-proxy?url={}",
            enc(format!("http://{stub}/m/root.m3u8"))
        ))
        .send()
        .await
        .unwrap();
    client
        .get(format!(
            "http://{proxy}/ts-proxy?url={}",
            enc(format!("http://{stub}/seg/data.ts"))
        ))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let json: serde_json::Value = client
        .get(format!("http://{proxy}/proxy/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(json["global"]["requests"], 2);
    assert_eq!(json["global"]["manifest_requests"], 1);
    assert_eq!(json["global"]["segment_requests"], 1);
    assert_eq!(json["global"]["success_rate_pct"], 100.0);
    assert_eq!(json["hosts"]["127.0.0.1"]["requests"], 2);
    assert_eq!(json["cache_misses"], 1);
}
