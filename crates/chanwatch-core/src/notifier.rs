//! Delivery of pending work items to reviewers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};
use tracing::{debug, info, warn};

use chanwatch_db::models::PendingDelivery;
use chanwatch_db::{Database, ProcessingRepo};
use chanwatch_types::events::ReviewAction;
use chanwatch_types::models::{DeliveryHandle, ProcessingId, ProcessingStatus};

const PREVIEW_CHARS: usize = 400;
const EMPTY_TEXT: &str = "(no text)";

/// Outbound messaging to reviewers.
#[async_trait]
pub trait ReviewerNotifier: Send + Sync {
    async fn deliver(&self, chat_id: i64, notice: &ReviewNotice) -> anyhow::Result<DeliveryHandle>;

    /// Delete a delivered notification.
    async fn retract(&self, handle: &DeliveryHandle) -> anyhow::Result<()>;

    /// Rewrite the winner's notification to show the outcome.
    async fn acknowledge(&self, handle: &DeliveryHandle, status: ProcessingStatus) -> anyhow::Result<()>;

    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Everything a reviewer sees about one work item, already localized.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewNotice {
    pub processing_id: ProcessingId,
    pub channel_title: String,
    pub published: String,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    pub preview: String,
    pub actions: Vec<ReviewAction>,
}

impl ReviewNotice {
    pub fn from_pending(item: &PendingDelivery) -> Self {
        Self {
            processing_id: item.processing_id,
            channel_title: item.channel_title.clone(),
            published: local_timestamp(item.published_at, item.utc_offset_minutes, item.language.as_deref()),
            url: item.url.clone(),
            keywords: item.keywords.clone(),
            preview: preview(&item.text),
            actions: vec![
                ReviewAction::ShowFull(item.processing_id),
                ReviewAction::Processed(item.processing_id),
                ReviewAction::Postponed(item.processing_id),
            ],
        }
    }
}

/// Render `at` in the reviewer's offset with a date layout for their language.
pub fn local_timestamp(at: DateTime<Utc>, utc_offset_minutes: i32, language: Option<&str>) -> String {
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());

    let layout = match language.map(|l| l.trim().to_ascii_lowercase()) {
        Some(l) if l.starts_with("ru") || l.starts_with("de") => "%d.%m.%Y %H:%M:%S",
        Some(l) if l.starts_with("es") || l.starts_with("fr") => "%d/%m/%Y %H:%M:%S",
        _ => "%Y-%m-%d %H:%M:%S",
    };
    at.with_timezone(&offset).format(layout).to_string()
}

/// First 400 characters, with an ellipsis when cut.
pub fn preview(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return EMPTY_TEXT.to_string();
    }
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Sent, but the item was resolved meanwhile, so the message was pulled back.
    pub retracted_late: usize,
}

pub struct NotificationDispatcher {
    db: Arc<Database>,
    notifier: Arc<dyn ReviewerNotifier>,
    lookback: TimeDelta,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn ReviewerNotifier>, lookback: TimeDelta) -> Self {
        Self { db, notifier, lookback }
    }

    /// Send every pending, undelivered work item inside the lookback window.
    ///
    /// A failed send leaves the row untouched for the next cycle. A send
    /// whose row stopped being pending in the meantime is retracted.
    pub async fn run_cycle(&self) -> anyhow::Result<DispatchReport> {
        let since = Utc::now() - self.lookback;
        let pending = self.db.unit_of_work(|store| store.pending_undelivered(since))?;

        let mut report = DispatchReport::default();
        for item in &pending {
            report.attempted += 1;
            let notice = ReviewNotice::from_pending(item);

            let handle = match self.notifier.deliver(item.chat_id, &notice).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(
                        "Notify of work item {} to chat {} failed, will retry: {}",
                        item.processing_id, item.chat_id, e
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let recorded = self
                .db
                .unit_of_work(|store| store.record_delivery(item.processing_id, handle, Utc::now()));

            match recorded {
                Ok(true) => {
                    debug!("Work item {} delivered to chat {}", item.processing_id, item.chat_id);
                    report.delivered += 1;
                }
                Ok(false) => {
                    debug!("Work item {} was resolved while sending, retracting", item.processing_id);
                    if let Err(e) = self.notifier.retract(&handle).await {
                        warn!("Retracting late notification {} failed: {}", item.processing_id, e);
                    }
                    report.retracted_late += 1;
                }
                Err(e) => {
                    // Unrecorded, so the next cycle sends it again.
                    warn!("Recording delivery of work item {} failed: {}", item.processing_id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Background loop driving [`NotificationDispatcher::run_cycle`].
pub async fn run_notify_loop(dispatcher: Arc<NotificationDispatcher>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match dispatcher.run_cycle().await {
            Ok(report) => {
                if report.attempted > 0 {
                    info!(
                        "Notify: {} delivered, {} failed, {} retracted late",
                        report.delivered, report.failed, report.retracted_late
                    );
                }
            }
            Err(e) => {
                warn!("Notify cycle error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_follow_offset_and_language() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 22, 30, 5).unwrap();
        assert_eq!(local_timestamp(at, 180, Some("ru")), "10.03.2024 01:30:05");
        assert_eq!(local_timestamp(at, 60, Some("fr-FR")), "09/03/2024 23:30:05");
        assert_eq!(local_timestamp(at, 0, None), "2024-03-09 22:30:05");
        assert_eq!(local_timestamp(at, -300, Some("en")), "2024-03-09 17:30:05");
    }

    #[test]
    fn preview_cuts_on_characters() {
        let long = "я".repeat(450);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), 401);
        assert!(cut.ends_with('…'));

        assert_eq!(preview("short"), "short");
        assert_eq!(preview("   "), "(no text)");
    }
}
