use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// GET /health: Per-dependency up/down.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.engine.health().await;
    let status = if report.healthy() { "healthy" } else { "unhealthy" };
    let body = json!({
        "status": status,
        "mode": state.config.mode,
        "dependencies": report,
    });

    if report.healthy() {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

/// GET /ready: 200 only while the engine runs and storage answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.is_stopped() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "engine stopped" })),
        );
    }
    if !state.engine.health().await.repository {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "repository unavailable" })),
        );
    }
    (StatusCode::OK, Json(json!({ "ready": true })))
}
