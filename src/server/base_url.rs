//! Per-request derivation of the proxy's own public base URL.
//!
//! Rewritten manifests must embed absolute URLs pointing back at this
//! process, and the process usually sits behind a platform load balancer
//! that terminates TLS. The scheme therefore has to be inferred from the
//! host and forwarding headers rather than from the local socket.

use axum::http::HeaderMap;

/// Scheme + host the outside world should use to reach this proxy.
///
/// Rules, in order: a `.railway.app` host is always HTTPS (the platform
/// terminates TLS); localhost and private-range hosts are plain HTTP (local
/// dev); otherwise trust `X-Forwarded-Proto`, then the connection scheme,
/// and default to HTTPS.
pub fn derive(headers: &HeaderMap, connection_scheme: Option<&str>) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    let scheme = if host.ends_with(".railway.app") {
        "https"
    } else if is_local_host(host) {
        "http"
    } else if let Some(proto) = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        if proto.eq_ignore_ascii_case("http") { "http" } else { "https" }
    } else if let Some(scheme) = connection_scheme {
        if scheme.eq_ignore_ascii_case("http") { "http" } else { "https" }
    } else {
        "https"
    };

    format!("{scheme}://{host}")
}

/// Hostnames that can only be a local/dev deployment.
fn is_local_host(host: &str) -> bool {
    let bare = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    bare == "localhost"
        || bare == "127.0.0.1"
        || bare == "[::1]"
        || bare.starts_with("10.")
        || bare.starts_with("192.168.")
        || is_rfc1918_172(bare)
}

fn is_rfc1918_172(host: &str) -> bool {
    let Some(rest) = host.strip_prefix("172.") else {
        return false;
    };
    let Some((second, _)) = rest.split_once('.') else {
        return false;
    };
    matches!(second.parse::<u8>(), Ok(b) if (16..=31).contains(&b))
}
