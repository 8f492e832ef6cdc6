pub mod manifest;
pub mod metrics;
pub mod resolve;
pub mod segment;
pub mod status;
pub mod subtitle;

use reqwest::header::HeaderMap;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::server::state::AppState;
use crate::upstream;
use crate::url_safety;

/// A vetted proxy target: canonical URL plus the caller's upstream headers.
pub(crate) struct Target {
    pub url: Url,
    pub caller_headers: HeaderMap,
    /// The caller's `headers` JSON, kept verbatim for propagation into
    /// rewritten manifest URLs.
    pub headers_json: Option<String>,
}

impl Target {
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Run the shared admission pipeline: presence → smuggling checks →
/// canonicalization → host policy → caller header parsing.
pub(crate) fn vet_target(
    state: &AppState,
    url_param: Option<&str>,
    headers_param: Option<&str>,
) -> Result<Target> {
    let raw = url_param.ok_or_else(|| ProxyError::UrlMalformed("missing url parameter".into()))?;

    url_safety::validate_safety(raw)?;
    let url = url_safety::normalize(raw)?;

    let host = url
        .host()
        .ok_or_else(|| ProxyError::UrlMalformed("url has no host".into()))?;
    if !state.policy.is_allowed(&host) {
        return Err(ProxyError::HostNotAllowed(host.to_string()));
    }

    let caller_headers = upstream::parse_caller_headers(headers_param)?;

    Ok(Target {
        url,
        caller_headers,
        headers_json: headers_param.map(str::to_string),
    })
}
