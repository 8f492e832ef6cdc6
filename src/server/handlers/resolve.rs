//! Provider-string resolution endpoint: `POST /resolve`.

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{ProxyError, Result};
use crate::resolver::Resolver;
use crate::upstream;
use crate::url_safety;

use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    url: Option<String>,
    headers: Option<serde_json::Value>,
}

/// POST `/resolve` with JSON body `{url, headers}` →
/// `{"url": "<canonical>", "resolved": true}`.
pub async fn post_resolve(
    State(state): State<AppState>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<serde_json::Value>> {
    let body = body
        .map(|Json(b)| b)
        .ok_or_else(|| ProxyError::UrlMalformed("request body must be a JSON object".into()))?;
    let input = body
        .url
        .ok_or_else(|| ProxyError::UrlMalformed("missing url field".into()))?;

    let headers_json = body
        .headers
        .as_ref()
        .filter(|v| v.is_object())
        .map(|v| v.to_string());
    let caller_headers = upstream::parse_caller_headers(headers_json.as_deref())?;

    let resolver = Resolver {
        client: &state.http_client,
        policy: state.policy.as_ref(),
        config: state.config.as_ref(),
    };
    let resolved = resolver.resolve(&input, &caller_headers).await?;

    info!(url = %url_safety::sanitize_for_logging(resolved.as_str()), "resolved provider input");

    Ok(Json(json!({
        "url": resolved.as_str(),
        "resolved": true,
    })))
}
