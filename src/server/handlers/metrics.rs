//! Metrics surface: `GET /proxy/metrics` and `POST /proxy/metrics/reset`.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::server::state::AppState;

pub async fn get_metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot(state.playlist_cache.counters()))
}

pub async fn post_metrics_reset(State(state): State<AppState>) -> Json<Value> {
    state.metrics.reset();
    Json(json!({"reset": true}))
}
