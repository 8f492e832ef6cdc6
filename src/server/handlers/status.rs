//! Liveness and environment introspection: `GET /proxy/status`.

use axum::{Json, extract::State, http::HeaderMap};
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::server::{base_url, state::AppState};

/// Reports how the proxy sees this request: derived public base URL, scheme
/// decisions, and the forwarding headers they came from. Useful when a
/// platform's load balancer and the manifest rewriter disagree about `S`.
pub async fn get_status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let server_url = base_url::derive(&headers, Some("http"));
    let protocol = server_url.split("://").next().unwrap_or("https");

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let x_forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    Json(json!({
        "status": "ok",
        "timestamp": timestamp,
        "userAgent": state.config.user_agent,
        "serverUrl": server_url,
        "protocol": protocol,
        "host": host,
        "xForwardedProto": x_forwarded_proto,
        "reqProtocol": "http",
    }))
}
