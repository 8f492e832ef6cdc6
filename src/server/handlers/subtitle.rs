//! Subtitle pass-through: `/sub-proxy`.
//!
//! Subtitles are small, static, and cacheable, unlike live manifests,
//! so they get a long public Cache-Control and a `text/vtt`
//! default content type.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::Response,
};
use serde::Deserialize;

use crate::error::{ProxyError, Result};
use crate::server::handlers::vet_target;
use crate::server::state::AppState;
use crate::upstream;

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    url: Option<String>,
    headers: Option<String>,
}

/// GET `/sub-proxy?url=…&headers=…`
pub async fn get_subtitle(
    State(state): State<AppState>,
    Query(query): Query<SubtitleQuery>,
) -> Result<Response> {
    let target = vet_target(&state, query.url.as_deref(), query.headers.as_deref())?;

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

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/vtt")
        .to_string();

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| ProxyError::Internal(e.to_string()))?;
    crate::server::cors::apply(response.headers_mut());
    Ok(response)
}
