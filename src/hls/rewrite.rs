//! HLS manifest rewriting.
//!
//! Every URI inside a fetched manifest is re-pointed at this proxy, because
//! clients cannot be made to send the custom Referer/Origin an upstream
//! expects; the proxy has to stay on the data path for every sub-request.
//! Nested playlists route through `/m3u8-proxy` (so they get rewritten in
//! turn); segments and encryption keys route through `/ts-proxy` (byte
//! pass-through).
//!
//! The rewrite is deliberately line-based: unknown tags must survive
//! byte-for-byte, which a parse/serialize round-trip does not guarantee.

use url::Url;

/// Which proxy endpoint a rewritten URI should target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    /// `/m3u8-proxy`: nested playlists, rewritten recursively on fetch.
    Manifest,
    /// `/ts-proxy`: segments and encryption keys, streamed verbatim.
    Media,
}

impl Route {
    fn path(&self) -> &'static str {
        match self {
            Route::Manifest => "/m3u8-proxy",
            Route::Media => "/ts-proxy",
        }
    }
}

/// Rewrites one manifest body against a fixed upstream base and proxy base.
pub struct Rewriter<'a> {
    /// Canonical URL the manifest was fetched from; relative URIs resolve
    /// against it.
    base: &'a Url,
    /// Public base URL of this proxy, no trailing slash (e.g.
    /// `https://proxy.example`).
    proxy_base: &'a str,
    /// Caller-supplied headers as canonical JSON, appended to every
    /// rewritten URL so sub-requests carry them too.
    headers_json: Option<&'a str>,
}

impl<'a> Rewriter<'a> {
    pub fn new(base: &'a Url, proxy_base: &'a str, headers_json: Option<&'a str>) -> Self {
        Self {
            base,
            proxy_base,
            headers_json,
        }
    }

    /// Rewrite a whole manifest. Lines are split on `\n`, trimmed, processed
    /// independently, and rejoined with `\n`.
    pub fn rewrite(&self, body: &str) -> String {
        body.split('\n')
            .map(|line| self.rewrite_line(line.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn rewrite_line(&self, line: &str) -> String {
        if line.is_empty() {
            return String::new();
        }

        if let Some(rest) = line.strip_prefix('#') {
            if rest.starts_with("EXT-X-MEDIA:") && line.contains("URI=\"") {
                return self.rewrite_uri_attribute(line, Route::Manifest);
            }
            if rest.starts_with("EXT-X-KEY:") && line.contains("URI=\"") {
                return self.rewrite_uri_attribute(line, Route::Media);
            }
            return line.to_string();
        }

        // A plain URI line: a nested playlist or a media segment.
        match resolve(self.base, line) {
            Ok(absolute) => {
                let route = if absolute.path().contains("m3u8") || line.contains("m3u8") {
                    Route::Manifest
                } else {
                    Route::Media
                };
                self.proxy_url(route, &absolute)
            }
            // Unresolvable lines pass through untouched; the player will
            // fail on them the same way it would have without the proxy.
            Err(_) => line.to_string(),
        }
    }

    /// Splice a rewritten URL into the `URI="…"` attribute of a tag line,
    /// leaving every other attribute byte untouched.
    fn rewrite_uri_attribute(&self, line: &str, route: Route) -> String {
        let Some(attr_start) = line.find("URI=\"") else {
            return line.to_string();
        };
        let value_start = attr_start + 5;
        let Some(quote_offset) = line[value_start..].find('"') else {
            return line.to_string();
        };
        let value_end = value_start + quote_offset;
        let original = &line[value_start..value_end];

        match resolve(self.base, original) {
            Ok(absolute) => {
                let mut out = String::with_capacity(line.len() + 64);
                out.push_str(&line[..value_start]);
                out.push_str(&self.proxy_url(route, &absolute));
                out.push_str(&line[value_end..]);
                out
            }
            Err(_) => line.to_string(),
        }
    }

    /// `{S}{route}?url={%-encoded absolute}` plus `&headers={%-encoded JSON}`
    /// when the caller supplied custom headers.
    fn proxy_url(&self, route: Route, target: &Url) -> String {
        let mut out = String::with_capacity(self.proxy_base.len() + target.as_str().len() + 32);
        out.push_str(self.proxy_base);
        out.push_str(route.path());
        out.push_str("?url=");
        out.push_str(&urlencoding::encode(target.as_str()));
        if let Some(headers) = self.headers_json {
            out.push_str("&headers=");
            out.push_str(&urlencoding::encode(headers));
        }
        out
    }
}

/// Resolve a manifest URI against the manifest's own URL: absolute URIs
/// parse directly, everything else joins.
fn resolve(base: &Url, raw: &str) -> Result<Url, url::ParseError> {
    match Url::parse(raw) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw),
        Err(e) => Err(e),
    }
}
