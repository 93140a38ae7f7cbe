use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccountId, ChannelId, ProcessingId, ReviewDecision};

// -- Monitoring runs --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Another run held the run lock; nothing was done.
    AlreadyRunning,
    /// No worker could be brought up. Watermarks are untouched.
    NoWorkers,
    /// No active channels or no usable keyword rules.
    NothingToDo,
}

/// Summary of one ingestion cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub channels_fetched: usize,
    pub channels_skipped: Vec<ChannelId>,
    /// Channels left for the next cycle because every worker dropped out.
    pub channels_deferred: Vec<ChannelId>,
    pub messages_seen: usize,
    pub new_posts: usize,
    pub failed_workers: Vec<AccountId>,
}

impl RunReport {
    pub fn empty(run_id: Uuid, status: RunStatus) -> Self {
        Self {
            run_id,
            status,
            channels_fetched: 0,
            channels_skipped: Vec::new(),
            channels_deferred: Vec::new(),
            messages_seen: 0,
            new_posts: 0,
            failed_workers: Vec::new(),
        }
    }
}

// -- Workers --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub account_id: AccountId,
    pub name: String,
    pub state: String,
    pub paused_for_secs: Option<u64>,
}

// -- Review actions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveRequest {
    pub decision: ReviewDecision,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    Resolved,
    AlreadyHandled,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub processing_id: ProcessingId,
    pub outcome: ResolveStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FullTextResponse {
    pub processing_id: ProcessingId,
    pub text: String,
}
