//! Liveness/readiness. No business semantics, no auth — a container
//! orchestrator or the job-primitive host polls these, not a bot or operator.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let Some(pool) = &state.db_pool else {
        return Json(json!({ "status": "ready", "backend": "memory" })).into_response();
    };

    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Json(json!({ "status": "ready", "backend": "postgres" })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readyz: database pool check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not_ready" }))).into_response()
        }
    }
}
