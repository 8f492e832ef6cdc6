use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default User-Agent presented to upstreams when neither a host template
/// nor the caller supplies one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Application configuration loaded from environment variables.
///
/// Every variable has a dev-friendly default so a bare `cargo run` yields a
/// working proxy; production deployments override via the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Allowed upstream hostnames (suffix match). Empty means allow all.
    pub host_allowlist: Vec<String>,
    /// Per-host upstream header templates, keyed by hostname suffix.
    pub host_headers: HashMap<String, HashMap<String, String>>,
    /// Sliding window length for the throttler.
    pub rate_limit_window: Duration,
    /// Max admitted requests per client within one window. 0 disables.
    pub rate_limit_max_requests: usize,
    /// Interval between throttler sweeps of idle clients.
    pub rate_limit_sweep_interval: Duration,
    pub playlist_cache_ttl: Duration,
    pub playlist_cache_max_entries: usize,
    /// Interval between playlist cache expiry sweeps.
    pub cache_sweep_interval: Duration,
    pub segment_cache_enabled: bool,
    pub segment_cache_ttl: Duration,
    pub segment_cache_max_entries: usize,
    pub user_agent: String,
    /// Per-upstream-request deadline. Strictly below `request_timeout`.
    pub upstream_timeout: Duration,
    /// Whole-request deadline enforced by the dispatcher.
    pub request_timeout: Duration,
    /// Deadline for resolver HEAD probes.
    pub probe_timeout: Duration,
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        let host_allowlist = env::var("HOST_ALLOWLIST")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        // JSON object: {"host.suffix": {"Referer": "...", "Origin": "..."}}
        let host_headers = match env::var("HOST_HEADER_TEMPLATES") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| format!("HOST_HEADER_TEMPLATES is not valid JSON: {e}"))?,
            Err(_) => HashMap::new(),
        };

        Ok(Config {
            port,
            host_allowlist,
            host_headers,
            rate_limit_window: Duration::from_millis(env_u64("RATE_LIMIT_WINDOW_MS", 60_000)),
            rate_limit_max_requests: env_u64("RATE_LIMIT_MAX_REQUESTS", 120) as usize,
            rate_limit_sweep_interval: Duration::from_secs(env_u64("RATE_LIMIT_SWEEP_SECS", 60)),
            playlist_cache_ttl: Duration::from_secs(env_u64("PLAYLIST_CACHE_TTL_SECS", 30)),
            playlist_cache_max_entries: env_u64("PLAYLIST_CACHE_MAX_ENTRIES", 500) as usize,
            cache_sweep_interval: Duration::from_secs(env_u64("CACHE_SWEEP_SECS", 10)),
            segment_cache_enabled: env_bool("SEGMENT_CACHE_ENABLED", false),
            segment_cache_ttl: Duration::from_secs(env_u64("SEGMENT_CACHE_TTL_SECS", 300)),
            segment_cache_max_entries: env_u64("SEGMENT_CACHE_MAX_ENTRIES", 1000) as usize,
            user_agent: env::var("PROXY_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            upstream_timeout: Duration::from_secs(env_u64("UPSTREAM_TIMEOUT_SECS", 55)),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 60)),
            probe_timeout: Duration::from_secs(env_u64("PROBE_TIMEOUT_SECS", 5)),
        })
    }
}

impl Default for Config {
    /// Defaults mirroring an empty environment; used by tests.
    fn default() -> Self {
        Config {
            port: 3000,
            host_allowlist: Vec::new(),
            host_headers: HashMap::new(),
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max_requests: 120,
            rate_limit_sweep_interval: Duration::from_secs(60),
            playlist_cache_ttl: Duration::from_secs(30),
            playlist_cache_max_entries: 500,
            cache_sweep_interval: Duration::from_secs(10),
            segment_cache_enabled: false,
            segment_cache_ttl: Duration::from_secs(300),
            segment_cache_max_entries: 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            upstream_timeout: Duration::from_secs(55),
            request_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}
