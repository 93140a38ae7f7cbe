/// Query-shaped rows that join several tables.
/// Plain entities come back as the `chanwatch-types` models directly.
use chrono::{DateTime, Utc};

use chanwatch_types::models::{PostId, ProcessingId, ReviewerId};

/// A pending work item that still needs its notification sent, with
/// everything the dispatcher renders.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub processing_id: ProcessingId,
    pub post_id: PostId,
    pub reviewer_id: ReviewerId,
    pub chat_id: i64,
    pub language: Option<String>,
    pub utc_offset_minutes: i32,
    pub channel_title: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub url: Option<String>,
    pub keywords: Vec<String>,
}
