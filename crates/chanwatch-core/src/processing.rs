//! Single-winner resolution of work items.
//!
//! The winner is decided by the store's conditional update, never by an
//! in-process lock, so several processes can resolve concurrently.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use chanwatch_db::{Database, PostRepo, ProcessingRepo};
use chanwatch_types::models::{
    DeliveryHandle, PostId, PostProcessing, ProcessingId, ProcessingStatus, ReviewDecision,
};

use crate::notifier::ReviewerNotifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call won. `ignored` siblings were closed, `retracted` of their
    /// notifications were deleted.
    Resolved {
        post_id: PostId,
        ignored: usize,
        retracted: usize,
    },
    /// Someone already acted on this post.
    StaleAction,
    NotFound,
}

enum Transition {
    Won {
        item: PostProcessing,
        losers: Vec<DeliveryHandle>,
        ignored: usize,
    },
    Stale,
    Missing,
}

pub struct ProcessingMachine {
    db: Arc<Database>,
    notifier: Arc<dyn ReviewerNotifier>,
}

impl ProcessingMachine {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn ReviewerNotifier>) -> Self {
        Self { db, notifier }
    }

    /// Move work item `id` out of `pending`.
    ///
    /// The conditional update, the sibling lookup and closing the siblings
    /// commit together. Notifications are touched only afterwards: losers'
    /// are deleted, the winner's is rewritten to show the outcome.
    pub async fn resolve(
        &self,
        id: ProcessingId,
        decision: ReviewDecision,
        comment: Option<&str>,
    ) -> anyhow::Result<ResolveOutcome> {
        let status = ProcessingStatus::from(decision);
        let now = Utc::now();
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        let transition = self.db.unit_of_work(|store| {
            let Some(item) = store.get_processing(id)? else {
                return Ok(Transition::Missing);
            };
            if !store.cas_resolve(id, status, comment, now)? {
                return Ok(Transition::Stale);
            }

            let losers = store
                .siblings(item.post_id, id)?
                .into_iter()
                .filter(|s| s.status == ProcessingStatus::Pending)
                .filter_map(|s| s.delivery)
                .collect();
            let ignored = store.ignore_pending_siblings(item.post_id, id, now)?;

            Ok(Transition::Won { item, losers, ignored })
        })?;

        let (item, losers, ignored) = match transition {
            Transition::Won { item, losers, ignored } => (item, losers, ignored),
            Transition::Stale => {
                info!("Work item {} was already handled", id);
                return Ok(ResolveOutcome::StaleAction);
            }
            Transition::Missing => return Ok(ResolveOutcome::NotFound),
        };

        let mut retracted = 0;
        for handle in &losers {
            match self.notifier.retract(handle).await {
                Ok(()) => retracted += 1,
                Err(e) => warn!(
                    "Could not retract notification {} in chat {}: {}",
                    handle.message_id, handle.chat_id, e
                ),
            }
        }

        if let Some(handle) = &item.delivery {
            if let Err(e) = self.notifier.acknowledge(handle, status).await {
                warn!("Could not acknowledge work item {}: {}", id, e);
            }
        }

        info!(
            "Work item {} resolved as {} (post {}, {} siblings ignored)",
            id, status, item.post_id, ignored
        );
        Ok(ResolveOutcome::Resolved {
            post_id: item.post_id,
            ignored,
            retracted,
        })
    }

    /// Untruncated text of the post behind work item `id`.
    pub fn full_text(&self, id: ProcessingId) -> anyhow::Result<Option<String>> {
        self.db.unit_of_work(|store| {
            let Some(item) = store.get_processing(id)? else {
                return Ok(None);
            };
            Ok(store.get_post(item.post_id)?.map(|post| post.text))
        })
    }

    /// Send the full text of work item `id` to `chat_id`. Returns `false`
    /// when the work item does not exist.
    pub async fn send_full_text(&self, id: ProcessingId, chat_id: i64) -> anyhow::Result<bool> {
        let Some(text) = self.full_text(id)? else {
            return Ok(false);
        };
        let text = if text.trim().is_empty() { "(no text)".to_string() } else { text };
        self.notifier.send_text(chat_id, &text).await?;
        Ok(true)
    }
}
