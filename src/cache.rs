//! Short-TTL response caches.
//!
//! The playlist cache stores *post-rewrite* manifest bodies keyed by the
//! canonical upstream URL, so a hit is served verbatim with no parsing.
//! A 30-second TTL keeps live playlists fresh while absorbing the refresh
//! hammering of concurrent players. The segment cache is specified but
//! disabled by default; range responses never enter it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

#[derive(Clone, Debug)]
struct PlaylistEntry {
    body: String,
    inserted_at: Instant,
}

/// Bounded manifest cache with per-entry TTL and hit/miss counters.
#[derive(Clone, Debug)]
pub struct PlaylistCache {
    entries: Arc<DashMap<String, PlaylistEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl PlaylistCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fresh rewritten body for `url`, or `None`. Expiry is also checked
    /// lazily here so reads never serve stale bodies between sweeps.
    pub fn get(&self, url: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(url) {
            if entry.inserted_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(url, "playlist cache hit");
                return Some(entry.body.clone());
            }
            drop(entry);
            self.entries.remove(url);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(url, "playlist cache miss");
        None
    }

    /// Insert a rewritten body. Overwriting resets the TTL. At capacity the
    /// oldest entry makes room (after dropping anything already expired).
    pub fn insert(&self, url: &str, body: String) {
        if !self.entries.contains_key(url) && self.entries.len() >= self.max_entries {
            self.sweep();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            url.to_string(),
            PlaylistEntry {
                body,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries. Runs periodically from a background task.
    pub fn sweep(&self) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    /// Remove everything, regardless of freshness.
    pub fn flush(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) observed so far.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[derive(Clone, Debug)]
struct SegmentEntry {
    body: Bytes,
    content_type: String,
    inserted_at: Instant,
    last_access: Instant,
}

/// Opt-in cache for complete (non-range) segment responses.
///
/// Replacement is least-recently-used by access time; TTL bounds staleness
/// the same way as the playlist cache.
#[derive(Clone, Debug)]
pub struct SegmentCache {
    entries: Arc<DashMap<String, SegmentEntry>>,
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
}

impl SegmentCache {
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            enabled,
            ttl,
            max_entries,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, url: &str) -> Option<(Bytes, String)> {
        if !self.enabled {
            return None;
        }
        if let Some(mut entry) = self.entries.get_mut(url) {
            if entry.inserted_at.elapsed() < self.ttl {
                entry.last_access = Instant::now();
                return Some((entry.body.clone(), entry.content_type.clone()));
            }
            drop(entry);
            self.entries.remove(url);
        }
        None
    }

    pub fn insert(&self, url: &str, body: Bytes, content_type: &str) {
        if !self.enabled {
            return;
        }
        if !self.entries.contains_key(url) && self.entries.len() >= self.max_entries {
            self.sweep();
            if self.entries.len() >= self.max_entries {
                self.evict_least_recent();
            }
        }
        let now = Instant::now();
        self.entries.insert(
            url.to_string(),
            SegmentEntry {
                body,
                content_type: content_type.to_string(),
                inserted_at: now,
                last_access: now,
            },
        );
    }

    pub fn sweep(&self) {
        if !self.enabled {
            return;
        }
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict_least_recent(&self) {
        let coldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access)
            .map(|entry| entry.key().clone());
        if let Some(key) = coldest {
            self.entries.remove(&key);
        }
    }
}
