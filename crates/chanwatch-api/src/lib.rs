//! HTTP surface of the monitoring service: manual runs, worker status,
//! review actions and the Bot API callback webhook.

pub mod monitoring;
pub mod review;
pub mod state;
pub mod webhook;

use axum::Router;
use axum::routing::{get, post};

pub use state::{AppState, AppStateInner};
pub use webhook::CallbackAnswerer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(monitoring::health))
        .route("/monitoring/run", post(monitoring::run_now))
        .route("/workers", get(monitoring::workers))
        .route("/processing/{processing_id}/resolve", post(review::resolve))
        .route("/processing/{processing_id}/text", get(review::full_text))
        .route("/telegram/callback", post(webhook::callback))
        .with_state(state)
}
