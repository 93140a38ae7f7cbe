use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::error;

use chanwatch_types::api::RunReport;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Trigger an ingestion run now. Overlapping triggers get `already_running`.
pub async fn run_now(State(state): State<AppState>) -> Result<Json<RunReport>, StatusCode> {
    let report = state.monitor.run_once().await.map_err(|e| {
        error!("Manual run failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(report))
}

pub async fn workers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.workers().await)
}
