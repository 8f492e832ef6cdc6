//! Upstream host policy: allowlisting and per-host header templates.
//!
//! Read-only after construction. Matching peels labels from the left, so an
//! allowlist entry `example.com` admits `cdn.example.com` and
//! `eu.cdn.example.com`; the most specific template wins.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Host;

use crate::config::Config;

#[derive(Debug, Default)]
pub struct HostPolicy {
    /// Lowercased hostname suffixes. Empty admits everything public.
    allowlist: Vec<String>,
    /// Header templates keyed by lowercased hostname suffix.
    templates: HashMap<String, HashMap<String, String>>,
}

impl HostPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowlist: config.host_allowlist.clone(),
            templates: config
                .host_headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
        }
    }

    /// Whether the proxy may fetch from `host`.
    ///
    /// An empty allowlist admits any public host, but IP literals in
    /// private/reserved ranges stay blocked unless explicitly listed.
    /// That is the SSRF line even for open deployments.
    pub fn is_allowed(&self, host: &Host<&str>) -> bool {
        match host {
            Host::Domain(domain) => {
                let domain = domain.to_ascii_lowercase();
                if self.allowlist.is_empty() {
                    return true;
                }
                suffixes(&domain).any(|s| self.allowlist.iter().any(|a| a == s))
            }
            Host::Ipv4(ip) => {
                if is_blocked_ipv4(*ip) {
                    self.allowlist.iter().any(|a| a == &ip.to_string())
                } else {
                    self.allowlist.is_empty()
                        || self.allowlist.iter().any(|a| a == &ip.to_string())
                }
            }
            Host::Ipv6(ip) => {
                if is_blocked_ipv6(*ip) {
                    self.allowlist.iter().any(|a| a == &ip.to_string())
                } else {
                    self.allowlist.is_empty()
                        || self.allowlist.iter().any(|a| a == &ip.to_string())
                }
            }
        }
    }

    /// Base upstream headers for `hostname`: the most specific template
    /// match, with `caller` merged on top (caller wins per field).
    pub fn headers_for(&self, hostname: &str, caller: &HeaderMap) -> HeaderMap {
        let mut merged = HeaderMap::new();

        let hostname = hostname.to_ascii_lowercase();
        // suffixes() yields most-specific first; take the first template hit.
        if let Some(template) = suffixes(&hostname).find_map(|s| self.templates.get(s)) {
            for (name, value) in template {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    merged.insert(name, value);
                }
            }
        }

        for (name, value) in caller {
            merged.insert(name.clone(), value.clone());
        }

        merged
    }
}

/// Iterate `h`, then each dot-suffix of `h` peeling labels from the left:
/// `a.b.example.com` → `a.b.example.com`, `b.example.com`, `example.com`, `com`.
fn suffixes(host: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(host), |current| {
        current.split_once('.').map(|(_, rest)| rest)
    })
}

/// IPv4 ranges the proxy refuses to fetch from without an explicit
/// allowlist entry:
/// - `0.0.0.0/8`      — "this" network
/// - `10.0.0.0/8`     — RFC 1918 private
/// - `127.0.0.0/8`    — loopback
/// - `169.254.0.0/16` — link-local / cloud-metadata endpoints
/// - `172.16.0.0/12`  — RFC 1918 private
/// - `192.168.0.0/16` — RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    let (a, b) = (octets[0], octets[1]);

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// IPv6 loopback, link-local (`fe80::/10`), and unique-local (`fc00::/7`).
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_loopback() || (s[0] & 0xffc0) == 0xfe80 || (s[0] & 0xfe00) == 0xfc00
}
