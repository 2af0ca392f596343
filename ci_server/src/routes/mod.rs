//! HTTP routes: webhook intake and the read-only build API.

pub mod api;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

use crate::config::CiConfig;
use crate::models::build::BuildAttempt;
use crate::services::build_service::BuildPipeline;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub pipeline: Arc<BuildPipeline>,
    pub config: CiConfig,
    /// Bounds how many accepted builds run at once.
    pub build_slots: Arc<Semaphore>,
    /// Every accepted build, queued or running.
    pub builds: TaskTracker,
}

impl CiRouterState {
    pub fn new(pipeline: Arc<BuildPipeline>, config: CiConfig) -> Self {
        let build_slots = Arc::new(Semaphore::new(config.max_concurrent_builds.max(1)));
        Self {
            pipeline,
            config,
            build_slots,
            builds: TaskTracker::new(),
        }
    }

    /// Wait up to `grace` for accepted builds to be recorded. Call once the
    /// listener has stopped. Returns false if some were still running at the
    /// deadline.
    pub async fn drain_builds(&self, grace: Duration) -> bool {
        self.builds.close();
        let pending = self.builds.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight builds");
        }
        match tokio::time::timeout(grace, self.builds.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.builds.len(),
                    grace_secs = grace.as_secs(),
                    "Shutting down with builds still running"
                );
                false
            }
        }
    }
}

pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        // Webhook
        .route("/webhook", post(webhook_handler))
        .route("/webhook/github", post(webhook_handler))
        // Build API
        .route("/api/builds", get(list_builds_handler))
        .route("/api/builds/{build_id}", get(get_build_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, &headers, body).await
}

// ── Build API ──

#[derive(serde::Deserialize)]
pub struct ListBuildsQuery {
    pub limit: Option<usize>,
}

async fn list_builds_handler(
    State(state): State<CiRouterState>,
    Query(query): Query<ListBuildsQuery>,
) -> Json<Vec<BuildAttempt>> {
    let limit = query.limit.unwrap_or(api::DEFAULT_LIMIT);
    Json(api::list_builds(state.pipeline.history(), limit).await)
}

async fn get_build_handler(
    State(state): State<CiRouterState>,
    Path(build_id): Path<String>,
) -> Result<Json<BuildAttempt>, StatusCode> {
    api::get_build(state.pipeline.history(), &build_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
