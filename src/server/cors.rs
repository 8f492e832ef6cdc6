//! Permissive CORS for media playback.
//!
//! The whole point of the proxy is letting browser players fetch streams
//! their origin policy would otherwise block, so every response (success,
//! error, and preflight alike) carries the full header set. `Expose-Headers` must
//! include the range headers or browsers hide them from HLS.js.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, HEAD, OPTIONS";
pub const ALLOW_HEADERS: &str =
    "Content-Type, Range, Accept, Origin, Referer, User-Agent, Authorization, X-Requested-With";
pub const EXPOSE_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges, Content-Type";
pub const ALLOW_CREDENTIALS: &str = "false";
pub const MAX_AGE: &str = "86400";

/// Insert the full CORS set into a header map, overwriting anything an
/// upstream may have sent along.
pub fn apply(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static(ALLOW_CREDENTIALS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE),
    );
}

/// Axum middleware: answer preflight for any path with 204, and stamp the
/// CORS set onto every other response after the handler runs.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply(response.headers_mut());
        return response;
    }

    let mut response = next.run(req).await;
    apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sets_full_header_set() {
        let mut headers = HeaderMap::new();
        apply(&mut headers);

        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("access-control-allow-methods").unwrap(),
            "GET, HEAD, OPTIONS"
        );
        assert_eq!(
            headers.get("access-control-expose-headers").unwrap(),
            "Content-Length, Content-Range, Accept-Ranges, Content-Type"
        );
        assert_eq!(
            headers.get("access-control-allow-credentials").unwrap(),
            "false"
        );
        assert_eq!(headers.get("access-control-max-age").unwrap(), "86400");
    }

    #[test]
    fn apply_overwrites_upstream_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://upstream.example"),
        );
        apply(&mut headers);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    }
}
