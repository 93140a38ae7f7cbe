//! Bot API webhook. Button presses arrive here as callback queries.
//!
//! Always answers 200 so the Bot API does not redeliver; problems are
//! reported to the presser through the callback answer instead.

use async_trait::async_trait;
use axum::{Json, extract::State, http::StatusCode};
use tracing::{debug, error, info, warn};

use chanwatch_core::processing::ResolveOutcome;
use chanwatch_telegram::BotClient;
use chanwatch_telegram::bot::ACKNOWLEDGED_PREFIX;
use chanwatch_telegram::updates::{CallbackQuery, Update};
use chanwatch_types::events::ReviewAction;

use crate::state::AppState;

pub const ALREADY_HANDLED: &str = "Already handled by another reviewer";
pub const NOT_FOUND: &str = "This item no longer exists";
pub const UNKNOWN_ACTION: &str = "Unknown action";
pub const TRY_AGAIN: &str = "Something went wrong, try again";
pub const REPAIR_ELSEWHERE: &str = "Re-authorize the account from the admin console";

/// Answers button presses so the client stops its spinner.
#[async_trait]
pub trait CallbackAnswerer: Send + Sync {
    async fn answer(&self, callback_query_id: &str, text: Option<&str>) -> anyhow::Result<()>;
}

#[async_trait]
impl CallbackAnswerer for BotClient {
    async fn answer(&self, callback_query_id: &str, text: Option<&str>) -> anyhow::Result<()> {
        Ok(self.answer_callback(callback_query_id, text).await?)
    }
}

pub async fn callback(State(state): State<AppState>, Json(update): Json<Update>) -> StatusCode {
    let Some(query) = update.callback_query else {
        debug!("Ignoring update {} without a callback query", update.update_id);
        return StatusCode::OK;
    };

    let reply = handle_press(&state, &query).await;
    if let Err(e) = state.answerer.answer(&query.id, reply).await {
        warn!("Could not answer callback {}: {:#}", query.id, e);
    }
    StatusCode::OK
}

async fn handle_press(state: &AppState, query: &CallbackQuery) -> Option<&'static str> {
    let data = query.data.as_deref().unwrap_or_default();
    if data.starts_with(ACKNOWLEDGED_PREFIX) {
        return Some(ALREADY_HANDLED);
    }

    let action: ReviewAction = match data.parse() {
        Ok(action) => action,
        Err(e) => {
            warn!("Callback from user {}: {}", query.from.id, e);
            return Some(UNKNOWN_ACTION);
        }
    };

    if let Some((id, decision)) = action.decision() {
        return match state.machine.resolve(id, decision, None).await {
            Ok(ResolveOutcome::Resolved { .. }) => {
                info!("User {} resolved work item {} as {:?}", query.from.id, id, decision);
                None
            }
            Ok(ResolveOutcome::StaleAction) => Some(ALREADY_HANDLED),
            Ok(ResolveOutcome::NotFound) => Some(NOT_FOUND),
            Err(e) => {
                error!("Resolving work item {} failed: {:#}", id, e);
                Some(TRY_AGAIN)
            }
        };
    }

    match action {
        ReviewAction::ShowFull(id) => match state.machine.send_full_text(id, query.chat_id()).await {
            Ok(true) => None,
            Ok(false) => Some(NOT_FOUND),
            Err(e) => {
                error!("Sending full text of work item {} failed: {:#}", id, e);
                Some(TRY_AGAIN)
            }
        },
        ReviewAction::RepairAccount(account_id) => {
            info!("User {} asked to repair account {}", query.from.id, account_id);
            Some(REPAIR_ELSEWHERE)
        }
        ReviewAction::Processed(_) | ReviewAction::Postponed(_) => None,
    }
}
