//! Segment proxy endpoint: `/ts-proxy`.
//!
//! Range-aware streaming pass-through. The client's `Range` header goes
//! upstream verbatim, the upstream's partial-content status and range
//! headers come back verbatim, and the body is piped chunk by chunk,
//! never buffered. Encryption keys ride this same path; they are just small
//! bodies.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::metrics::Category;
use crate::server::handlers::{Target, vet_target};
use crate::server::state::AppState;
use crate::upstream;

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    url: Option<String>,
    headers: Option<String>,
}

/// GET `/ts-proxy?url=…&headers=…`
pub async fn get_segment(
    State(state): State<AppState>,
    req_headers: HeaderMap,
    Query(query): Query<SegmentQuery>,
) -> Result<Response> {
    let target = vet_target(&state, query.url.as_deref(), query.headers.as_deref())?;

    let start = Instant::now();
    let result = stream_segment(&state, &req_headers, &target).await;

    let (success, status, code) = match &result {
        Ok(response) => (true, response.status().as_u16(), None),
        Err(e) => (false, e.http_status().as_u16(), Some(e.code())),
    };
    state.metrics.record(
        target.url.as_str(),
        target.host(),
        Category::Segment,
        success,
        status,
        start.elapsed(),
        code.as_deref(),
    );

    result
}

async fn stream_segment(
    state: &AppState,
    req_headers: &HeaderMap,
    target: &Target,
) -> Result<Response> {
    let range = req_headers.get(header::RANGE).cloned();

    // Complete responses can be served from the segment cache when the
    // operator opted in; ranged requests always go upstream.
    if range.is_none()
        && let Some((body, content_type)) = state.segment_cache.get(target.url.as_str())
    {
        debug!(host = target.host(), "segment cache hit");
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .header("x-cache", "HIT")
            .body(Body::from(body))
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        crate::server::cors::apply(response.headers_mut());
        return Ok(response);
    }

    let mut upstream_headers = upstream::build_headers(
        &state.policy,
        &state.config,
        &target.url,
        &target.caller_headers,
    );
    if let Some(range) = &range {
        upstream_headers.insert(header::RANGE, range.clone());
    }

    let response = upstream::get(
        &state.http_client,
        &target.url,
        upstream_headers,
        state.config.upstream_timeout,
    )
    .await?;

    upstream::classify_status(response.status(), target.host())?;

    // 206 must survive the proxy or players lose byte-range semantics.
    let status = if response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/mp2t")
        .to_string();

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &content_type);
    for name in [
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
    ] {
        if let Some(value) = response.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    // CORS is set here, before the body starts, so browsers can expose the
    // range headers; the outer middleware stamping is a no-op by then.
    let body = if state.segment_cache.enabled() && range.is_none() && status == StatusCode::OK {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Internal(format!("failed to read segment body: {e}")))?;
        state
            .segment_cache
            .insert(target.url.as_str(), bytes.clone(), &content_type);
        Body::from(bytes)
    } else {
        Body::from_stream(response.bytes_stream())
    };

    let mut response = builder
        .body(body)
        .map_err(|e| ProxyError::Internal(e.to_string()))?;
    crate::server::cors::apply(response.headers_mut());
    Ok(response)
}
