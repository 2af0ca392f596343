//! GitHub webhook handler: receives push events and starts builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::display_chain;
use crate::models::push::PushEvent;
use crate::routes::CiRouterState;
use crate::services::github_service;

/// Handle an incoming GitHub webhook payload.
///
/// Accepted pushes answer 202 right away; the build runs on its own task.
pub async fn handle_webhook(state: &CiRouterState, headers: &HeaderMap, body: Bytes) -> Response {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // A missing event header is treated as a push, so plain POSTs of a
    // payload still build.
    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("push");

    match event_type {
        "push" => handle_push(state, &body),
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            StatusCode::OK.into_response()
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            (StatusCode::ACCEPTED, Json(json!({ "status": "ignored" }))).into_response()
        }
    }
}

fn handle_push(state: &CiRouterState, body: &[u8]) -> Response {
    let event = match PushEvent::decode(body) {
        Ok(event) => event,
        Err(e) => {
            let e = display_chain(e);
            tracing::warn!("Rejected push payload: {e}");
            return (StatusCode::BAD_REQUEST, format!("Invalid payload: {e}")).into_response();
        }
    };

    if event.deleted {
        tracing::info!(branch = %event.branch, "Ignoring branch deletion push");
        return (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response();
    }

    let attempt = state.pipeline.accept(&event);
    let id = attempt.id;

    let pipeline = state.pipeline.clone();
    let slots = state.build_slots.clone();
    state.builds.spawn(async move {
        // Queued pushes show as pending on GitHub while they wait for a slot.
        pipeline.report_pending(&attempt, &event).await;
        let _permit = match slots.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(build_id = %attempt.id, "Build slots closed: {e}");
                return;
            }
        };
        pipeline.execute_and_record(attempt, &event).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": "pending" })),
    )
        .into_response()
}
