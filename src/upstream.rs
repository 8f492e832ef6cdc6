//! Shared upstream fetch plumbing.
//!
//! All three upstream-facing paths (manifest fetch, segment stream, resolver
//! probe) go through here: header assembly from the host template + caller
//! headers, Referer repair, the 55-second per-request deadline, and upstream
//! status classification. Upstream failures are never retried; players
//! re-request aggressively enough on their own.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::ProxyError;
use crate::policy::HostPolicy;

/// Parse the caller's `headers` input (JSON object of string pairs) into a
/// case-insensitive header map. Absent input yields an empty map; present
/// but unparseable input is a caller error.
pub fn parse_caller_headers(raw: Option<&str>) -> Result<HeaderMap, ProxyError> {
    let Some(raw) = raw else {
        return Ok(HeaderMap::new());
    };

    let parsed: HashMap<String, String> = serde_json::from_str(raw)
        .map_err(|e| ProxyError::UrlMalformed(format!("headers is not a JSON object: {e}")))?;

    let mut headers = HeaderMap::new();
    for (name, value) in parsed {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

/// Repair a Referer the client could not express as an absolute URL.
///
/// A path-absolute Referer is prefixed with the Origin; anything else is
/// treated as a slug under the Origin. Without an Origin to anchor on the
/// Referer is dropped rather than forwarded broken.
pub fn repair_referer(headers: &mut HeaderMap) {
    let Some(referer) = headers.get(REFERER).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if Url::parse(referer).is_ok() {
        return;
    }

    let referer = referer.to_string();
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match origin {
        Some(origin) => {
            let repaired = if referer.starts_with('/') {
                format!("{origin}{referer}")
            } else {
                format!("{origin}/{referer}")
            };
            if let Ok(value) = HeaderValue::from_str(&repaired) {
                debug!(%repaired, "repaired malformed referer");
                headers.insert(REFERER, value);
            } else {
                headers.remove(REFERER);
            }
        }
        None => {
            debug!("dropping malformed referer without origin");
            headers.remove(REFERER);
        }
    }
}

/// Assemble the header set for an upstream request: host template, caller
/// headers on top, Referer repaired, default User-Agent filled in last.
pub fn build_headers(
    policy: &HostPolicy,
    config: &Config,
    target: &Url,
    caller: &HeaderMap,
) -> HeaderMap {
    let hostname = target.host_str().unwrap_or_default();
    let mut headers = policy.headers_for(hostname, caller);

    repair_referer(&mut headers);

    if !headers.contains_key(USER_AGENT)
        && let Ok(value) = HeaderValue::from_str(&config.user_agent)
    {
        headers.insert(USER_AGENT, value);
    }

    headers
}

/// Issue an upstream GET under the per-request deadline.
pub async fn get(
    client: &Client,
    target: &Url,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<Response, ProxyError> {
    let response = client
        .get(target.clone())
        .headers(headers)
        .timeout(timeout)
        .send()
        .await?;
    Ok(response)
}

/// Issue a HEAD probe (resolver content-type sniffing).
pub async fn head(
    client: &Client,
    target: &Url,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<Response, ProxyError> {
    let response = client
        .head(target.clone())
        .headers(headers)
        .timeout(timeout)
        .send()
        .await?;
    Ok(response)
}

/// Map a non-OK upstream status onto the error taxonomy.
///
/// 401 and 403 both surface as HTTP 403 toward the client (no browser
/// credential prompt); the genuine status stays visible in the error code.
pub fn classify_status(status: StatusCode, host: &str) -> Result<(), ProxyError> {
    match status.as_u16() {
        200..=299 => Ok(()),
        401 | 403 => Err(ProxyError::UpstreamDenied {
            status: status.as_u16(),
            host: host.to_string(),
        }),
        404 => Err(ProxyError::UpstreamNotFound {
            host: host.to_string(),
        }),
        code => Err(ProxyError::UpstreamStatus {
            status: code,
            host: host.to_string(),
        }),
    }
}
