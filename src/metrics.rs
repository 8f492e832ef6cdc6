//! Per-host and global request observability.
//!
//! Counters are monotonic until an explicit reset. Timings live in bounded
//! FIFO buffers (latest 1000 per category per scope) so means track recent
//! behavior without unbounded growth. Every terminated request additionally
//! emits one structured log event carrying the sanitized URL. Full URLs
//! with tokens never reach the log.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use crate::url_safety::sanitize_for_logging;

/// Timing buffer bound per category per scope.
const TIMING_BUFFER_CAP: usize = 1000;

/// Request category, for counters and timing buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Manifest,
    Segment,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Manifest => "manifest",
            Category::Segment => "segment",
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    requests: u64,
    errors: u64,
    manifest_requests: u64,
    manifest_errors: u64,
    segment_requests: u64,
    segment_errors: u64,
    manifest_timings: VecDeque<f64>,
    segment_timings: VecDeque<f64>,
    last_error: Option<LastError>,
}

#[derive(Clone, Debug, Serialize)]
struct LastError {
    code: String,
    at_epoch_ms: u64,
}

impl Scope {
    fn record(&mut self, category: Category, success: bool, duration: Duration, error_code: Option<&str>) {
        self.requests += 1;
        if !success {
            self.errors += 1;
        }

        let millis = duration.as_secs_f64() * 1000.0;
        let timings = match category {
            Category::Manifest => {
                self.manifest_requests += 1;
                if !success {
                    self.manifest_errors += 1;
                }
                &mut self.manifest_timings
            }
            Category::Segment => {
                self.segment_requests += 1;
                if !success {
                    self.segment_errors += 1;
                }
                &mut self.segment_timings
            }
        };
        if timings.len() == TIMING_BUFFER_CAP {
            timings.pop_front();
        }
        timings.push_back(millis);

        if let Some(code) = error_code {
            self.last_error = Some(LastError {
                code: code.to_string(),
                at_epoch_ms: epoch_ms(),
            });
        }
    }

    fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            requests: self.requests,
            errors: self.errors,
            manifest_requests: self.manifest_requests,
            manifest_errors: self.manifest_errors,
            segment_requests: self.segment_requests,
            segment_errors: self.segment_errors,
            mean_manifest_ms: round2(mean(&self.manifest_timings)),
            mean_segment_ms: round2(mean(&self.segment_timings)),
            success_rate_pct: round2(percentage(self.requests - self.errors, self.requests)),
            segment_error_rate_pct: round2(percentage(self.segment_errors, self.segment_requests)),
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScopeSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub manifest_requests: u64,
    pub manifest_errors: u64,
    pub segment_requests: u64,
    pub segment_errors: u64,
    pub mean_manifest_ms: f64,
    pub mean_segment_ms: f64,
    pub success_rate_pct: f64,
    pub segment_error_rate_pct: f64,
    last_error: Option<LastError>,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub global: ScopeSnapshot,
    pub hosts: std::collections::BTreeMap<String, ScopeSnapshot>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Registry of per-host and global request metrics.
///
/// Updates take short critical sections (one host mutex or the global
/// mutex); readers snapshot without blocking writers for long.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    hosts: Arc<DashMap<String, Mutex<Scope>>>,
    global: Arc<Mutex<Scope>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminated request and emit the structured request log.
    pub fn record(
        &self,
        url: &str,
        host: &str,
        category: Category,
        success: bool,
        http_status: u16,
        duration: Duration,
        error_code: Option<&str>,
    ) {
        {
            let mut global = self.global.lock().unwrap_or_else(|p| p.into_inner());
            global.record(category, success, duration, error_code);
        }
        {
            let entry = self
                .hosts
                .entry(host.to_string())
                .or_insert_with(|| Mutex::new(Scope::default()));
            let mut scope = entry.lock().unwrap_or_else(|p| p.into_inner());
            scope.record(category, success, duration, error_code);
        }

        info!(
            target: "hlsgate::request",
            url = %sanitize_for_logging(url),
            host,
            category = category.as_str(),
            success,
            status = http_status,
            duration_ms = duration.as_millis() as u64,
            "request"
        );
    }

    pub fn snapshot(&self, cache_counters: (u64, u64)) -> MetricsSnapshot {
        let global = self
            .global
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .snapshot();
        let hosts = self
            .hosts
            .iter()
            .map(|entry| {
                let scope = entry.value().lock().unwrap_or_else(|p| p.into_inner());
                (entry.key().clone(), scope.snapshot())
            })
            .collect();
        MetricsSnapshot {
            global,
            hosts,
            cache_hits: cache_counters.0,
            cache_misses: cache_counters.1,
        }
    }

    /// Explicit reset; the only way counters go backwards.
    pub fn reset(&self) {
        self.hosts.clear();
        *self.global.lock().unwrap_or_else(|p| p.into_inner()) = Scope::default();
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
