//! URL normalization and smuggling defense.
//!
//! Everything user-supplied enters through [`normalize`] and
//! [`validate_safety`] before any component compares, caches, or fetches a
//! URL, so the whole pipeline operates on a single canonical representation.
//! [`sanitize_for_logging`] keeps tokens out of log lines.

use crate::error::ProxyError;
use url::Url;

/// Query parameter names whose values are redacted from logs.
const SENSITIVE_PARAMS: &[&str] = &[
    "token",
    "key",
    "auth",
    "signature",
    "sig",
    "access_token",
    "api_key",
];

/// Parse a user-supplied string into its canonical URL form.
///
/// Trims whitespace, strips any fragment, and parses; if parsing fails the
/// input is percent-decoded once and retried (players and middleboxes love
/// handing us pre-encoded URLs). Only `http` and `https` survive.
///
/// Idempotent: normalizing an already-canonical URL yields itself.
pub fn normalize(input: &str) -> Result<Url, ProxyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::UrlMalformed("empty url".into()));
    }

    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let mut parsed = Url::parse(without_fragment);
    if parsed.is_err() {
        // Decode exactly once and retry; double-encoded inputs stay invalid.
        if let Ok(decoded) = urlencoding::decode(without_fragment) {
            parsed = Url::parse(decoded.trim());
        }
    }

    let mut url = parsed
        .map_err(|e| ProxyError::UrlMalformed(format!("invalid url '{without_fragment}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ProxyError::UrlMalformed(format!(
                "scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    // A fragment can reappear after the single decode pass.
    url.set_fragment(None);

    if url.host_str().is_none() {
        return Err(ProxyError::UrlMalformed(format!(
            "no host in url '{without_fragment}'"
        )));
    }

    Ok(url)
}

/// Reject URL-smuggling attempts before fetching anything.
///
/// Two checks, both cheap and both fatal:
/// - more than one `http(s)://` occurrence means a second URL is hiding in
///   the input (concatenation or query smuggling);
/// - a query value that itself starts with `http(s)://` and, after one
///   decode, contains further `?`/`&` or parses as JSON is a nested URL
///   trying to reach a host the outer URL would not.
pub fn validate_safety(input: &str) -> Result<(), ProxyError> {
    let lowered = input.to_ascii_lowercase();
    let occurrences = lowered.matches("http://").count() + lowered.matches("https://").count();
    if occurrences > 1 {
        return Err(ProxyError::UrlMalformed(
            "multiple URLs detected in a single input".into(),
        ));
    }

    let Ok(url) = Url::parse(input.trim()) else {
        // normalize() is the authority on parseability.
        return Ok(());
    };

    let Some(query) = url.query() else {
        return Ok(());
    };

    for pair in query.split('&') {
        let raw_value = pair.split_once('=').map(|(_, v)| v).unwrap_or("");
        let decoded = urlencoding::decode(raw_value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| raw_value.to_string());
        let lowered = decoded.to_ascii_lowercase();

        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            continue;
        }
        if decoded.contains('?') || decoded.contains('&') {
            return Err(ProxyError::UrlMalformed(
                "nested URL in query parameter".into(),
            ));
        }
        if serde_json::from_str::<serde_json::Value>(&decoded).is_ok() {
            return Err(ProxyError::UrlMalformed(
                "encoded JSON blob in query parameter".into(),
            ));
        }
    }

    Ok(())
}

/// Render a URL safe for log output.
///
/// Sensitive query values become `[REDACTED]`; scheme, host, and path stay
/// visible. Unparseable input is clipped to its first 100 bytes.
pub fn sanitize_for_logging(input: &str) -> String {
    let Ok(mut url) = Url::parse(input.trim()) else {
        return clip(input, 100);
    };

    let Some(query) = url.query() else {
        return url.to_string();
    };

    // Rebuild from the raw query so untouched values keep their original
    // encoding; brackets survive a set_query round-trip un-escaped.
    let rebuilt: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, _))
                if SENSITIVE_PARAMS.iter().any(|s| k.eq_ignore_ascii_case(s)) =>
            {
                format!("{k}=[REDACTED]")
            }
            _ => pair.to_string(),
        })
        .collect();

    url.set_query(Some(&rebuilt.join("&")));
    url.to_string()
}

fn clip(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}
