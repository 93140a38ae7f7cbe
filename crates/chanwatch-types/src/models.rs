use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type ChannelId = i64;
pub type KeywordId = i64;
pub type PostId = i64;
pub type ProcessingId = i64;
pub type ReviewerId = i64;

/// Returned when a status column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// -- Accounts --

/// A worker identity: one set of credentials able to open a protocol session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub api_id: String,
    pub api_hash: String,
    pub phone: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_authorized: bool,
    /// Opaque serialized session, owned by the session bridge.
    pub session_blob: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl Account {
    /// Only active, authorized accounts are handed to the worker pool.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.is_authorized
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub api_id: String,
    pub api_hash: String,
    pub phone: String,
    pub description: Option<String>,
    pub session_blob: Option<String>,
    pub is_authorized: bool,
}

// -- Channels --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Active,
    Paused,
    Disabled,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for ChannelStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "disabled" => Ok(Self::Disabled),
            other => Err(UnknownVariant::new("channel status", other)),
        }
    }
}

/// A monitoring target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub title: String,
    /// Public handle without the leading `@`.
    pub username: Option<String>,
    pub invite_link: Option<String>,
    pub status: ChannelStatus,
    /// Watermark: highest message id already ingested.
    pub last_parsed_message_id: Option<i64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn watermark(&self) -> i64 {
        self.last_parsed_message_id.unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub title: String,
    pub username: Option<String>,
    pub invite_link: Option<String>,
}

// -- Keywords --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordKind {
    /// Whole word, case-insensitive.
    Word,
    /// Case-insensitive substring.
    Phrase,
    /// User supplied pattern, compiled case-insensitively.
    Regex,
}

impl KeywordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::Phrase => "phrase",
            Self::Regex => "regex",
        }
    }
}

impl FromStr for KeywordKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "word" => Ok(Self::Word),
            "phrase" => Ok(Self::Phrase),
            "regex" => Ok(Self::Regex),
            other => Err(UnknownVariant::new("keyword type", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: KeywordId,
    pub text: String,
    pub kind: KeywordKind,
    pub is_active: bool,
}

// -- Posts --

/// One ingested channel message. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub message_id: i64,
    pub text: String,
    pub media_type: Option<String>,
    pub published_at: DateTime<Utc>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel_id: ChannelId,
    pub message_id: i64,
    pub text: String,
    pub media_type: Option<String>,
    pub published_at: DateTime<Utc>,
    pub url: Option<String>,
}

// -- Reviewers --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewerRole {
    Admin,
    Operator,
    User,
}

impl ReviewerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::User => "user",
        }
    }

    /// Admins and operators both receive work items.
    pub fn reviews_posts(&self) -> bool {
        matches!(self, Self::Admin | Self::Operator)
    }
}

impl FromStr for ReviewerRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            "user" => Ok(Self::User),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub role: ReviewerRole,
    pub is_active: bool,
    pub language: Option<String>,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone)]
pub struct NewReviewer {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub role: ReviewerRole,
    pub language: Option<String>,
    pub utc_offset_minutes: i32,
}

// -- Post processing --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Postponed,
    /// Imposed on every non-winning row once a reviewer has acted.
    Ignored,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Postponed => "postponed",
            Self::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "postponed" => Ok(Self::Postponed),
            "ignored" => Ok(Self::Ignored),
            other => Err(UnknownVariant::new("processing status", other)),
        }
    }
}

/// The two outcomes a reviewer may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Processed,
    Postponed,
}

impl From<ReviewDecision> for ProcessingStatus {
    fn from(decision: ReviewDecision) -> Self {
        match decision {
            ReviewDecision::Processed => ProcessingStatus::Processed,
            ReviewDecision::Postponed => ProcessingStatus::Postponed,
        }
    }
}

/// Where a notification was delivered, so it can later be edited or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// One work item: a post offered to one reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessing {
    pub id: ProcessingId,
    pub post_id: PostId,
    pub reviewer_id: ReviewerId,
    pub status: ProcessingStatus,
    pub comment: Option<String>,
    pub delivery: Option<DeliveryHandle>,
    pub notify_sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}
