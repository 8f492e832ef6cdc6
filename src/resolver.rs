//! Provider-string resolution.
//!
//! Scrapers hand back messy strings: `"A or B"` alternates, pipe-separated
//! lists, JSON envelopes, prose with a URL buried inside. The resolver
//! normalizes all of that to exactly one canonical manifest URL, verified
//! against the safety layer and host policy, with a short HEAD probe to
//! confirm the target actually serves HLS.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::ProxyError;
use crate::policy::HostPolicy;
use crate::upstream;
use crate::url_safety;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"<>{}|]+"#).expect("URL regex should compile"));

static OR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+or\s+").expect("or-split regex should compile"));

/// JSON fields searched, in order, when the input is a JSON object.
const JSON_URL_FIELDS: &[&str] = &["url", "link", "src", "source", "stream", "m3u8", "playlist"];

pub struct Resolver<'a> {
    pub client: &'a Client,
    pub policy: &'a HostPolicy,
    pub config: &'a Config,
}

impl Resolver<'_> {
    /// Resolve a provider string to one canonical manifest URL.
    pub async fn resolve(&self, input: &str, caller: &HeaderMap) -> Result<Url, ProxyError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ProxyError::UrlMalformed("empty resolver input".into()));
        }

        // Alternates first: "A or B" then "A|B". Each part runs the full
        // candidate pipeline; the first success wins.
        let parts: Vec<&str> = if OR_RE.is_match(input) {
            OR_RE.split(input).collect()
        } else if input.contains('|') {
            input.split('|').collect()
        } else {
            vec![input]
        };

        let mut last_err: Option<ProxyError> = None;
        for part in &parts {
            match self.resolve_single(part.trim(), caller).await {
                Ok(url) => return Ok(url),
                Err(e) => {
                    debug!(part = %url_safety::sanitize_for_logging(part), error = %e, "alternative failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e @ ProxyError::HostNotAllowed(_)) => e,
            _ if parts.len() > 1 => ProxyError::UrlMalformed(format!(
                "none of {} alternatives resolved to a playable URL",
                parts.len()
            )),
            Some(e) => e,
            None => ProxyError::UrlMalformed("no URL found in input".into()),
        })
    }

    async fn resolve_single(&self, part: &str, caller: &HeaderMap) -> Result<Url, ProxyError> {
        // A JSON object narrows the haystack to its first URL-bearing field.
        let haystack = match serde_json::from_str::<serde_json::Value>(part) {
            Ok(serde_json::Value::Object(object)) => {
                let field = JSON_URL_FIELDS
                    .iter()
                    .find_map(|f| object.get(*f).and_then(|v| v.as_str()))
                    .ok_or_else(|| {
                        ProxyError::UrlMalformed(
                            "JSON object has no recognized URL field".into(),
                        )
                    })?;
                field.to_string()
            }
            _ => part.to_string(),
        };

        let matches: Vec<&str> = URL_RE.find_iter(&haystack).map(|m| m.as_str()).collect();
        if matches.is_empty() {
            return Err(ProxyError::UrlMalformed(format!(
                "no http(s) URL found in input ({} bytes)",
                haystack.len()
            )));
        }

        // Prefer candidates that look like manifests.
        let (m3u8ish, rest): (Vec<&str>, Vec<&str>) =
            matches.iter().copied().partition(|m| m.contains("m3u8"));
        let had_m3u8_candidates = !m3u8ish.is_empty();

        let mut blocked_host: Option<String> = None;
        for candidate in m3u8ish.iter().chain(rest.iter()) {
            let url = match self.vet(candidate) {
                Ok(url) => url,
                Err(ProxyError::HostNotAllowed(host)) => {
                    blocked_host = Some(host);
                    continue;
                }
                Err(_) => continue,
            };

            if self.probe_confirms_hls(&url, caller).await {
                return Ok(url);
            }
        }

        // No probed winner: without any manifest-looking candidate, hand the
        // first vetted match to the player and let playback discover the
        // content type.
        if !had_m3u8_candidates {
            for candidate in &matches {
                match self.vet(candidate) {
                    Ok(url) => return Ok(url),
                    Err(ProxyError::HostNotAllowed(host)) => blocked_host = Some(host),
                    Err(_) => {}
                }
            }
        }

        Err(match blocked_host {
            Some(host) => ProxyError::HostNotAllowed(host),
            None => ProxyError::UrlMalformed(format!(
                "no candidate URL survived vetting ({} extracted)",
                matches.len()
            )),
        })
    }

    /// Safety check, then canonicalization, then the allowlist.
    fn vet(&self, candidate: &str) -> Result<Url, ProxyError> {
        url_safety::validate_safety(candidate)?;
        let url = url_safety::normalize(candidate)?;
        let host = url
            .host()
            .ok_or_else(|| ProxyError::UrlMalformed("candidate has no host".into()))?;
        if !self.policy.is_allowed(&host) {
            return Err(ProxyError::HostNotAllowed(host.to_string()));
        }
        Ok(url)
    }

    /// HEAD-probe a candidate. Accept on an HLS content type or an `.m3u8`
    /// URL; a failed probe is forgiven when the URL textually says m3u8
    /// (plenty of origins reject HEAD yet serve GET fine).
    async fn probe_confirms_hls(&self, url: &Url, caller: &HeaderMap) -> bool {
        let textual_m3u8 = url.as_str().contains("m3u8");
        let headers = upstream::build_headers(self.policy, self.config, url, caller);

        match upstream::head(self.client, url, headers, self.config.probe_timeout).await {
            Ok(response) => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                content_type.contains("mpegurl")
                    || content_type.contains("m3u8")
                    || url.as_str().contains(".m3u8")
            }
            Err(e) => {
                debug!(url = %url_safety::sanitize_for_logging(url.as_str()), error = %e, "HEAD probe failed");
                textual_m3u8
            }
        }
    }
}
