//! Per-entity repository interfaces.
//!
//! The engine only talks to storage through these traits. [`crate::Store`]
//! implements all of them on top of SQLite; every method runs inside the
//! caller's unit of work.

use anyhow::Result;
use chrono::{DateTime, Utc};

use chanwatch_types::models::{
    Account, AccountId, Channel, ChannelId, ChannelStatus, DeliveryHandle, Keyword, KeywordId,
    KeywordKind, NewAccount, NewChannel, NewPost, NewReviewer, Post, PostId, PostProcessing,
    ProcessingId, ProcessingStatus, Reviewer, ReviewerId,
};

use crate::models::PendingDelivery;

pub trait AccountRepo {
    fn insert_account(&self, account: &NewAccount) -> Result<AccountId>;
    fn get_account(&self, id: AccountId) -> Result<Option<Account>>;
    /// Accounts that are both active and authorized, ordered by id.
    fn list_usable_accounts(&self) -> Result<Vec<Account>>;
    fn set_authorized(&self, id: AccountId, authorized: bool) -> Result<()>;
    /// Store a fresh session after re-authorization and mark the account usable again.
    fn store_session(&self, id: AccountId, session_blob: &str) -> Result<()>;
    fn touch_account_used(&self, id: AccountId, at: DateTime<Utc>) -> Result<()>;
}

pub trait ChannelRepo {
    fn insert_channel(&self, channel: &NewChannel) -> Result<ChannelId>;
    fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>>;
    fn list_active_channels(&self) -> Result<Vec<Channel>>;
    fn set_channel_status(&self, id: ChannelId, status: ChannelStatus) -> Result<()>;
    /// Raise the watermark to `message_id`. Never lowers it: returns `false`
    /// when the stored watermark is already at or above `message_id`.
    fn advance_watermark(&self, id: ChannelId, message_id: i64, at: DateTime<Utc>) -> Result<bool>;
    fn touch_checked(&self, id: ChannelId, at: DateTime<Utc>) -> Result<()>;
}

pub trait KeywordRepo {
    fn insert_keyword(&self, text: &str, kind: KeywordKind) -> Result<KeywordId>;
    fn list_active_keywords(&self) -> Result<Vec<Keyword>>;
    fn set_keyword_active(&self, id: KeywordId, active: bool) -> Result<()>;
}

pub trait ReviewerRepo {
    fn insert_reviewer(&self, reviewer: &NewReviewer) -> Result<ReviewerId>;
    /// Insert or promote a Telegram user to an active admin.
    fn upsert_admin(&self, telegram_id: i64) -> Result<ReviewerId>;
    /// Active admins and operators.
    fn list_reviewers(&self) -> Result<Vec<Reviewer>>;
    fn list_admins(&self) -> Result<Vec<Reviewer>>;
}

pub trait PostRepo {
    /// Insert keyed on (channel id, message id). On conflict the stored row
    /// wins and is returned with `false`.
    fn insert_post_or_get(&self, post: &NewPost) -> Result<(Post, bool)>;
    fn get_post(&self, id: PostId) -> Result<Option<Post>>;
    fn find_post(&self, channel_id: ChannelId, message_id: i64) -> Result<Option<Post>>;
    fn posts_for_channel(&self, channel_id: ChannelId) -> Result<Vec<Post>>;
    /// Duplicate matches are ignored.
    fn add_keyword_match(&self, post_id: PostId, keyword_id: KeywordId) -> Result<()>;
    fn matched_keywords(&self, post_id: PostId) -> Result<Vec<String>>;
}

pub trait ProcessingRepo {
    /// Create a pending row for (post, reviewer) unless one exists. Returns
    /// whether a row was created.
    fn ensure_processing(&self, post_id: PostId, reviewer_id: ReviewerId) -> Result<bool>;
    fn get_processing(&self, id: ProcessingId) -> Result<Option<PostProcessing>>;
    fn list_for_post(&self, post_id: PostId) -> Result<Vec<PostProcessing>>;
    /// Conditional transition out of `pending`. `false` means the row was
    /// not pending anymore (or does not exist) and nothing changed.
    fn cas_resolve(
        &self,
        id: ProcessingId,
        status: ProcessingStatus,
        comment: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    fn siblings(&self, post_id: PostId, exclude: ProcessingId) -> Result<Vec<PostProcessing>>;
    /// Move every still-pending sibling to `ignored`. Returns the count.
    fn ignore_pending_siblings(
        &self,
        post_id: PostId,
        exclude: ProcessingId,
        at: DateTime<Utc>,
    ) -> Result<usize>;
    fn pending_undelivered(&self, published_since: DateTime<Utc>) -> Result<Vec<PendingDelivery>>;
    /// Record where the notification went. Only applies to rows that are
    /// still pending and have no handle yet.
    fn record_delivery(
        &self,
        id: ProcessingId,
        handle: DeliveryHandle,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}
