//! Manifest proxy endpoints: `/m3u8-proxy` (GET and POST) and the
//! `/proxy/hls` alias.
//!
//! Fetches the upstream playlist, rewrites every URI to point back at this
//! proxy, caches the rewritten body for the short TTL, and emits it with the
//! HLS media type. Cache hits skip the upstream round-trip entirely.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::time::Instant;
use tracing::info;

use crate::error::{ProxyError, Result};
use crate::hls::rewrite::Rewriter;
use crate::metrics::Category;
use crate::server::handlers::{Target, vet_target};
use crate::server::{base_url, state::AppState};
use crate::upstream;

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    url: Option<String>,
    headers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestBody {
    url: Option<String>,
    headers: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct HlsAliasQuery {
    link: Option<String>,
    headers: Option<String>,
}

/// GET `/m3u8-proxy?url=…&headers=…`
pub async fn get_manifest(
    State(state): State<AppState>,
    req_headers: HeaderMap,
    Query(query): Query<ManifestQuery>,
) -> Result<Response> {
    let target = vet_target(&state, query.url.as_deref(), query.headers.as_deref())?;
    serve_manifest(state, req_headers, target).await
}

/// POST `/m3u8-proxy` with JSON body `{url, headers}`.
pub async fn post_manifest(
    State(state): State<AppState>,
    req_headers: HeaderMap,
    body: Option<axum::Json<ManifestBody>>,
) -> Result<Response> {
    let body = body
        .map(|axum::Json(b)| b)
        .ok_or_else(|| ProxyError::UrlMalformed("request body must be a JSON object".into()))?;
    let headers_json = body
        .headers
        .as_ref()
        .filter(|v| v.is_object())
        .map(|v| v.to_string());
    let target = vet_target(&state, body.url.as_deref(), headers_json.as_deref())?;
    serve_manifest(state, req_headers, target).await
}

/// GET `/proxy/hls?link=…`, same pipeline under the legacy parameter name.
pub async fn get_hls_alias(
    State(state): State<AppState>,
    req_headers: HeaderMap,
    Query(query): Query<HlsAliasQuery>,
) -> Result<Response> {
    let target = vet_target(&state, query.link.as_deref(), query.headers.as_deref())?;
    serve_manifest(state, req_headers, target).await
}

async fn serve_manifest(
    state: AppState,
    req_headers: HeaderMap,
    target: Target,
) -> Result<Response> {
    let start = Instant::now();
    let result = fetch_and_rewrite(&state, &req_headers, &target).await;

    let (success, status, code) = match &result {
        Ok((_, cache_state)) => {
            info!(host = target.host(), cache = *cache_state, "manifest served");
            (true, 200, None)
        }
        Err(e) => (false, e.http_status().as_u16(), Some(e.code())),
    };
    state.metrics.record(
        target.url.as_str(),
        target.host(),
        Category::Manifest,
        success,
        status,
        start.elapsed(),
        code.as_deref(),
    );

    let (body, cache_state) = result?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-cache"), cache_state),
        ],
        body,
    )
        .into_response())
}

/// Cache consult, upstream fetch, rewrite, cache insert.
async fn fetch_and_rewrite(
    state: &AppState,
    req_headers: &HeaderMap,
    target: &Target,
) -> Result<(String, &'static str)> {
    if let Some(cached) = state.playlist_cache.get(target.url.as_str()) {
        return Ok((cached, "HIT"));
    }

    let upstream_headers = upstream::build_headers(
        &state.policy,
        &state.config,
        &target.url,
        &target.caller_headers,
    );
    let response = upstream::get(
        &state.http_client,
        &target.url,
        upstream_headers,
        state.config.upstream_timeout,
    )
    .await?;

    upstream::classify_status(response.status(), target.host())?;

    let text = response
        .text()
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read manifest body: {e}")))?;

    let proxy_base = base_url::derive(req_headers, None);
    let rewritten = Rewriter::new(&target.url, &proxy_base, target.headers_json.as_deref())
        .rewrite(&text);

    state
        .playlist_cache
        .insert(target.url.as_str(), rewritten.clone());

    Ok((rewritten, "MISS"))
}
