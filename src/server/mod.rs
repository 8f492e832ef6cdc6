pub mod base_url;
pub mod cors;
pub mod handlers;
pub mod state;
pub mod throttle;

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ProxyError;
use state::AppState;

/// Build the full router over a fresh [`AppState`]. Test entry point.
pub async fn build_router(config: Config) -> Router {
    build_router_with_state(AppState::new(config))
}

/// Router assembly: routes, then (inside-out) request deadline, throttler,
/// and CORS/preflight.
pub fn build_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/proxy/status", get(handlers::status::get_status))
        .route("/proxy/metrics", get(handlers::metrics::get_metrics))
        .route(
            "/proxy/metrics/reset",
            post(handlers::metrics::post_metrics_reset),
        )
        .route(
            "/m3u8-proxy",
            get(handlers::manifest::get_manifest).post(handlers::manifest::post_manifest),
        )
        .route("/proxy/hls", get(handlers::manifest::get_hls_alias))
        .route("/ts-proxy", get(handlers::segment::get_segment))
        .route("/sub-proxy", get(handlers::subtitle::get_subtitle))
        .route("/resolve", post(handlers::resolve::post_resolve))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            deadline_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            throttle::throttle_middleware,
        ))
        .layer(middleware::from_fn(cors::cors_middleware))
        .with_state(state)
}

/// Whole-request deadline (60 s by default). The upstream deadline is
/// strictly shorter, so this one only fires when the proxy itself stalls.
/// Streaming bodies are exempt once response headers exist.
async fn deadline_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(state.config.request_timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => ProxyError::Timeout.into_response(),
    }
}

/// Spawn the background sweeps: playlist/segment cache expiry and throttler
/// record reclamation. Handles are aborted at shutdown.
pub fn spawn_sweepers(state: &AppState) -> Vec<JoinHandle<()>> {
    let cache_interval = state.config.cache_sweep_interval;
    let throttle_interval = state.config.rate_limit_sweep_interval;

    let playlist_cache = state.playlist_cache.clone();
    let segment_cache = state.segment_cache.clone();
    let cache_sweep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(cache_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            playlist_cache.sweep();
            segment_cache.sweep();
        }
    });

    let throttler = state.throttler.clone();
    let throttle_sweep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(throttle_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            throttler.sweep();
        }
    });

    vec![cache_sweep, throttle_sweep]
}

/// Start the HTTP server and run until ctrl-c.
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState::new(config);
    let sweepers = spawn_sweepers(&state);
    let app = build_router_with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Proxy listening on http://{}", addr);

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let result = serve.await;

    for handle in sweepers {
        handle.abort();
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
