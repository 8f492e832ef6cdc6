//! Per-client sliding-window throttling.
//!
//! Keyed by client identifier: first `X-Forwarded-For` value, else
//! `X-Real-IP`, else the peer address, else `"unknown"`. Each record keeps
//! the timestamps admitted inside the current window; a periodic sweep
//! reclaims records whose timestamps have all aged out.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ProxyError;
use crate::server::state::AppState;

/// Sliding-window per-client rate limiter.
#[derive(Clone, Debug)]
pub struct Throttler {
    clients: Arc<DashMap<String, Vec<Instant>>>,
    window: Duration,
    /// Max admitted requests per window. 0 disables throttling.
    max_requests: usize,
}

impl Throttler {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            window,
            max_requests,
        }
    }

    /// Admit or reject a request from `client_id` at `now`.
    ///
    /// Trim, count, and append happen under the record's lock, so the
    /// decision is atomic per client. After every admission each kept
    /// timestamp lies within `(now - window, now]` and the record holds at
    /// most `max_requests` entries.
    fn check_at(&self, client_id: &str, now: Instant) -> Result<(), ProxyError> {
        if self.max_requests == 0 {
            return Ok(());
        }

        let mut record = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(Vec::new);

        record.retain(|t| now.duration_since(*t) < self.window);

        if record.len() >= self.max_requests {
            // The client may retry once the oldest timestamp leaves the window.
            let oldest = record[0];
            let remaining = self.window.saturating_sub(now.duration_since(oldest));
            let retry_after = remaining.as_millis().div_ceil(1000) as u64;
            return Err(ProxyError::RateLimited { retry_after });
        }

        record.push(now);
        Ok(())
    }

    pub fn check(&self, client_id: &str) -> Result<(), ProxyError> {
        self.check_at(client_id, Instant::now())
    }

    /// Delete records whose timestamps have all aged out. Call periodically.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.clients.retain(|_, record| {
            record.retain(|t| now.duration_since(*t) < self.window);
            !record.is_empty()
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Resolve the throttling identity for a request.
pub fn client_id(req: &Request) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let ip = first.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        let ip = value.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Axum middleware: reject requests exceeding the per-client limit.
///
/// Preflight is exempt: the dispatcher answers OPTIONS before throttling.
pub async fn throttle_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::OPTIONS {
        let id = client_id(&req);
        if let Err(e) = state.throttler.check(&id) {
            warn!(client = %id, "rate limit exceeded");
            return e.into_response();
        }
    }

    next.run(req).await
}
