use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::cache::{PlaylistCache, SegmentCache};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::policy::HostPolicy;
use crate::server::throttle::Throttler;

/// Application state shared across all handlers.
///
/// Every component is an explicit value here; handlers receive the state by
/// clone, nothing hides in globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Shared HTTP client for upstream connection pooling.
    pub http_client: Client,
    pub playlist_cache: PlaylistCache,
    pub segment_cache: SegmentCache,
    pub throttler: Throttler,
    pub metrics: Metrics,
    pub policy: Arc<HostPolicy>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");

        let playlist_cache = PlaylistCache::new(
            config.playlist_cache_ttl,
            config.playlist_cache_max_entries,
        );
        let segment_cache = SegmentCache::new(
            config.segment_cache_enabled,
            config.segment_cache_ttl,
            config.segment_cache_max_entries,
        );
        let throttler = Throttler::new(config.rate_limit_window, config.rate_limit_max_requests);
        let policy = Arc::new(HostPolicy::from_config(&config));

        Self {
            config: Arc::new(config),
            http_client,
            playlist_cache,
            segment_cache,
            throttler,
            metrics: Metrics::new(),
            policy,
        }
    }
}
