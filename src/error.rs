//! Error taxonomy and HTTP translation.
//!
//! Every component surfaces a [`ProxyError`]; the dispatcher renders it as a
//! JSON envelope `{code, message, hint, host?}` with the full CORS header set
//! so browsers can read error bodies cross-origin.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::server::cors;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing, unparseable, nested, or double-encoded URL.
    #[error("{0}")]
    UrlMalformed(String),

    /// Hostname outside the configured allowlist.
    #[error("host '{0}' is not allowed")]
    HostNotAllowed(String),

    /// Throttler rejection; carries whole seconds until the window frees up.
    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Upstream 401/403. Both fold to HTTP 403 toward the client so browsers
    /// never show a credential prompt; the real status survives in `status`.
    #[error("upstream denied the request with status {status}")]
    UpstreamDenied { status: u16, host: String },

    /// Upstream 404.
    #[error("upstream returned 404 for this resource")]
    UpstreamNotFound { host: String },

    /// Any other non-OK upstream status, passed through.
    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16, host: String },

    /// Connection refusal or DNS failure reaching the upstream.
    #[error("failed to reach upstream: {0}")]
    BadGateway(String),

    /// Either the 55s upstream deadline or the 60s request deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// Unclassified fault.
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ProxyError::UrlMalformed(_) => StatusCode::BAD_REQUEST,
            ProxyError::HostNotAllowed(_) => StatusCode::FORBIDDEN,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UpstreamDenied { .. } => StatusCode::FORBIDDEN,
            ProxyError::UpstreamNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for the envelope.
    ///
    /// An `Internal` message carrying a leading `CODE:` prefix keeps that
    /// code, matching how callers smuggle categorized failures through
    /// otherwise-opaque error strings.
    pub fn code(&self) -> String {
        match self {
            ProxyError::UrlMalformed(_) => "URL_MALFORMED".into(),
            ProxyError::HostNotAllowed(_) => "HOST_NOT_ALLOWED".into(),
            ProxyError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED".into(),
            ProxyError::UpstreamDenied { status, .. } => format!("UPSTREAM_{status}"),
            ProxyError::UpstreamNotFound { .. } => "NOT_FOUND".into(),
            ProxyError::UpstreamStatus { status, .. } => format!("UPSTREAM_{status}"),
            ProxyError::BadGateway(_) => "BAD_GATEWAY".into(),
            ProxyError::Timeout => "TIMEOUT".into(),
            ProxyError::Internal(msg) => extract_code_prefix(msg)
                .unwrap_or("ERROR")
                .to_string(),
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            ProxyError::UrlMalformed(_) => {
                "Pass a single, well-formed http(s) URL in the 'url' parameter"
            }
            ProxyError::HostNotAllowed(_) => "The target host is not on the proxy allowlist",
            ProxyError::RateLimited { .. } => "Slow down and retry after the indicated delay",
            ProxyError::UpstreamDenied { .. } => {
                "The origin rejected the proxied credentials; check the supplied headers"
            }
            ProxyError::UpstreamNotFound { .. } => "The origin no longer serves this resource",
            ProxyError::UpstreamStatus { .. } => "The origin returned an unexpected status",
            ProxyError::BadGateway(_) => "The origin is unreachable (connection or DNS failure)",
            ProxyError::Timeout => "The origin took too long to respond",
            ProxyError::Internal(_) => "Unexpected proxy fault; check server logs",
        }
    }

    fn host(&self) -> Option<&str> {
        match self {
            ProxyError::HostNotAllowed(host) => Some(host),
            ProxyError::UpstreamDenied { host, .. }
            | ProxyError::UpstreamNotFound { host }
            | ProxyError::UpstreamStatus { host, .. } => Some(host),
            _ => None,
        }
    }
}

/// `"SOME_CODE: message"` → `Some("SOME_CODE")`.
fn extract_code_prefix(message: &str) -> Option<&str> {
    let (prefix, _) = message.split_once(':')?;
    if !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        Some(prefix)
    } else {
        None
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::Timeout
        } else if e.is_connect() {
            ProxyError::BadGateway(e.to_string())
        } else {
            ProxyError::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.http_status();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }

        let mut body = json!({
            "code": self.code(),
            "message": self.to_string(),
            "hint": self.hint(),
        });
        if let Some(host) = self.host() {
            body["host"] = json!(host);
        }
        if let ProxyError::RateLimited { retry_after } = &self {
            body["retryAfter"] = json!(retry_after);
        }

        let mut response = (status, axum::Json(body)).into_response();
        // Errors must stay readable from cross-origin players.
        cors::apply(response.headers_mut());
        response
    }
}
