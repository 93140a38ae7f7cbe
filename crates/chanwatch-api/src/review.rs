use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::error;

use chanwatch_core::processing::ResolveOutcome;
use chanwatch_types::api::{FullTextResponse, ResolveRequest, ResolveResponse, ResolveStatus};
use chanwatch_types::models::ProcessingId;

use crate::state::AppState;

pub async fn resolve(
    State(state): State<AppState>,
    Path(processing_id): Path<ProcessingId>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, StatusCode> {
    let outcome = state
        .machine
        .resolve(processing_id, req.decision, req.comment.as_deref())
        .await
        .map_err(|e| {
            error!("Resolving work item {} failed: {:#}", processing_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let outcome = match outcome {
        ResolveOutcome::Resolved { .. } => ResolveStatus::Resolved,
        ResolveOutcome::StaleAction => ResolveStatus::AlreadyHandled,
        ResolveOutcome::NotFound => return Err(StatusCode::NOT_FOUND),
    };
    Ok(Json(ResolveResponse { processing_id, outcome }))
}

pub async fn full_text(
    State(state): State<AppState>,
    Path(processing_id): Path<ProcessingId>,
) -> Result<Json<FullTextResponse>, StatusCode> {
    let text = state
        .machine
        .full_text(processing_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(FullTextResponse { processing_id, text }))
}
