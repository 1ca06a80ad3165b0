//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the daemon client, the cover
//! store and the broker.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::response::api_success;
use crate::api::sse::sse_handler;
use crate::api::AppState;
use crate::error::{ErrorCode, MpdWebError, MpdWebResult};
use crate::protocol_constants::SERVICE_ID;
use crate::utils::sniff_image_mime;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sse", get(sse_handler))
        .route("/mpd/{cmd}", get(proxy_command))
        .route("/cover", get(serve_cover))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness check and backpressure report.
///
/// Reports `"stopping"` once the broker has shut down. `broker` carries the
/// event totals and each mailbox's occupancy and drop count, so a client that
/// keeps falling behind shows up as a growing `dropped`.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.broker.stats().await;
    api_success(json!({
        "status": if stats.is_some() { "ok" } else { "stopping" },
        "service": SERVICE_ID,
        "sessions": state.sessions.session_count(),
        "subscribers": stats.as_ref().map_or(0, |s| s.subscribers),
        "broker": stats,
    }))
}

/// Forwards one command to the daemon and returns its reply as a JSON object.
async fn proxy_command(
    State(state): State<AppState>,
    Path(cmd): Path<String>,
) -> MpdWebResult<Response> {
    match state.daemon.request(&cmd).await {
        Ok(reply) => Ok(Json(reply.to_json_object()).into_response()),
        Err(e) => {
            log::debug!("[MPD] Command '{}' failed ({}): {}", cmd, e.code(), e);
            Err(e.into())
        }
    }
}

/// Serves the current cover image.
async fn serve_cover(State(state): State<AppState>) -> MpdWebResult<Response> {
    let Some(bytes) = state.covers.read().await? else {
        return Err(MpdWebError::CoverNotFound);
    };
    let mime = sniff_image_mime(&bytes);
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        bytes,
    )
        .into_response())
}
