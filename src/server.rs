use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::controller::{
    AiAnalysisRequest, CleanupRequest, Controller, HeartbeatRequest,
};
use crate::metrics;

/* ============================= CONTROLLER API ============================= */

pub fn build_controller_router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/ai-analysis/request", post(ai_analysis_handler))
        .route("/api/cleanup/request", post(cleanup_handler))
        .route("/api/heartbeat", post(heartbeat_handler))
        .route("/api/stats", get(stats_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/metrics", get(metrics_handler))
        .with_state(controller)
}

async fn ai_analysis_handler(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<AiAnalysisRequest>,
) -> impl IntoResponse {
    Json(controller.decide_ai(&request))
}

async fn cleanup_handler(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<CleanupRequest>,
) -> impl IntoResponse {
    Json(controller.decide_cleanup(&request))
}

async fn heartbeat_handler(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    Json(controller.heartbeat(&request))
}

async fn stats_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(controller.stats())
}

/* ============================= AGENT ENDPOINTS ============================= */

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: &'static str,
    pub build_time: &'static str,
    pub git_commit: &'static str,
}

impl VersionInfo {
    pub fn current() -> VersionInfo {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
            build_time: option_env!("BUILD_TIME").unwrap_or("unknown"),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
        }
    }
}

#[derive(Clone)]
pub struct AgentHttpState {
    pub ready: Arc<AtomicBool>,
}

pub fn build_agent_router(state: AgentHttpState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(ready_handler))
        .route("/version", get(|| async { Json(VersionInfo::current()) }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Standalone scrape surface for deployments that split metrics from health.
pub fn build_metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn ready_handler(State(state): State<AgentHttpState>) -> impl IntoResponse {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::render();
    if body.is_empty() {
        (StatusCode::INTERNAL_SERVER_ERROR, String::new())
    } else {
        (StatusCode::OK, body)
    }
}

/* ============================= SERVE ============================= */

/// Bind and serve until the shutdown signal; connections get the graceful
/// drain window.
pub async fn serve(router: Router, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind HTTP server on {addr}"))?;
    info!(addr = %addr, "http_server_started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
