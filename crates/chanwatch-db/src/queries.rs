use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use chanwatch_types::models::{
    Account, AccountId, Channel, ChannelId, ChannelStatus, DeliveryHandle, Keyword, KeywordId,
    KeywordKind, NewAccount, NewChannel, NewPost, NewReviewer, Post, PostId, PostProcessing,
    ProcessingId, ProcessingStatus, Reviewer, ReviewerId,
};

use crate::Store;
use crate::models::PendingDelivery;
use crate::repos::{AccountRepo, ChannelRepo, KeywordRepo, PostRepo, ProcessingRepo, ReviewerRepo};

const ACCOUNT_COLUMNS: &str = "id, name, api_id, api_hash, phone, description, is_active, \
     is_authorized, session_blob, last_used";
const CHANNEL_COLUMNS: &str =
    "id, title, username, invite_link, status, last_parsed_message_id, last_checked";
const REVIEWER_COLUMNS: &str =
    "id, telegram_id, username, role, is_active, language, utc_offset_minutes";
const POST_COLUMNS: &str = "id, channel_id, message_id, text, media_type, published_at, url";
const PROCESSING_COLUMNS: &str = "id, post_id, reviewer_id, status, comment, notify_chat_id, \
     notify_message_id, notify_sent_at, processed_at";

// -- Accounts --

impl AccountRepo for Store<'_> {
    fn insert_account(&self, account: &NewAccount) -> Result<AccountId> {
        self.conn.execute(
            "INSERT INTO account (name, api_id, api_hash, phone, description, session_blob, is_authorized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.name,
                account.api_id,
                account.api_hash,
                account.phone,
                account.description,
                account.session_blob,
                account.is_authorized,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?1");
        let row = self.conn.query_row(&sql, [id], account_from_row).optional()?;
        Ok(row)
    }

    fn list_usable_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account
             WHERE is_active = 1 AND is_authorized = 1
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_authorized(&self, id: AccountId, authorized: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE account SET is_authorized = ?2 WHERE id = ?1",
            params![id, authorized],
        )?;
        Ok(())
    }

    fn store_session(&self, id: AccountId, session_blob: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE account SET session_blob = ?2, is_authorized = 1 WHERE id = ?1",
            params![id, session_blob],
        )?;
        Ok(())
    }

    fn touch_account_used(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute("UPDATE account SET last_used = ?2 WHERE id = ?1", params![id, at])?;
        Ok(())
    }
}

// -- Channels --

impl ChannelRepo for Store<'_> {
    fn insert_channel(&self, channel: &NewChannel) -> Result<ChannelId> {
        self.conn.execute(
            "INSERT INTO channel (title, username, invite_link) VALUES (?1, ?2, ?3)",
            params![channel.title, channel.username, channel.invite_link],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channel WHERE id = ?1");
        let row = self.conn.query_row(&sql, [id], channel_from_row).optional()?;
        Ok(row)
    }

    fn list_active_channels(&self) -> Result<Vec<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channel WHERE status = 'active' ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], channel_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_channel_status(&self, id: ChannelId, status: ChannelStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE channel SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    fn advance_watermark(&self, id: ChannelId, message_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE channel SET last_parsed_message_id = ?2, last_checked = ?3
             WHERE id = ?1
               AND (last_parsed_message_id IS NULL OR last_parsed_message_id < ?2)",
            params![id, message_id, at],
        )?;
        Ok(changed == 1)
    }

    fn touch_checked(&self, id: ChannelId, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute("UPDATE channel SET last_checked = ?2 WHERE id = ?1", params![id, at])?;
        Ok(())
    }
}

// -- Keywords --

impl KeywordRepo for Store<'_> {
    fn insert_keyword(&self, text: &str, kind: KeywordKind) -> Result<KeywordId> {
        self.conn.execute(
            "INSERT INTO keyword (text, type) VALUES (?1, ?2)",
            params![text, kind.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_active_keywords(&self) -> Result<Vec<Keyword>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, text, type, is_active FROM keyword WHERE is_active = 1 ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Keyword {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    kind: parse_column(row, 2)?,
                    is_active: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_keyword_active(&self, id: KeywordId, active: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE keyword SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(())
    }
}

// -- Reviewers --

impl ReviewerRepo for Store<'_> {
    fn insert_reviewer(&self, reviewer: &NewReviewer) -> Result<ReviewerId> {
        self.conn.execute(
            "INSERT INTO reviewer (telegram_id, username, role, language, utc_offset_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reviewer.telegram_id,
                reviewer.username,
                reviewer.role.as_str(),
                reviewer.language,
                reviewer.utc_offset_minutes,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert_admin(&self, telegram_id: i64) -> Result<ReviewerId> {
        self.conn.execute(
            "INSERT INTO reviewer (telegram_id, role) VALUES (?1, 'admin')
             ON CONFLICT(telegram_id) DO UPDATE SET role = 'admin', is_active = 1",
            [telegram_id],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM reviewer WHERE telegram_id = ?1",
            [telegram_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn list_reviewers(&self) -> Result<Vec<Reviewer>> {
        let sql = format!(
            "SELECT {REVIEWER_COLUMNS} FROM reviewer
             WHERE is_active = 1 AND role IN ('admin', 'operator')
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], reviewer_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_admins(&self) -> Result<Vec<Reviewer>> {
        let sql = format!(
            "SELECT {REVIEWER_COLUMNS} FROM reviewer
             WHERE is_active = 1 AND role = 'admin'
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], reviewer_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// -- Posts --

impl PostRepo for Store<'_> {
    fn insert_post_or_get(&self, post: &NewPost) -> Result<(Post, bool)> {
        let inserted = self.conn.execute(
            "INSERT INTO post (channel_id, message_id, text, media_type, published_at, url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(channel_id, message_id) DO NOTHING",
            params![
                post.channel_id,
                post.message_id,
                post.text,
                post.media_type,
                post.published_at,
                post.url,
            ],
        )?;

        let stored = self
            .find_post(post.channel_id, post.message_id)?
            .ok_or_else(|| anyhow::anyhow!("post {}/{} vanished after insert", post.channel_id, post.message_id))?;
        Ok((stored, inserted == 1))
    }

    fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM post WHERE id = ?1");
        let row = self.conn.query_row(&sql, [id], post_from_row).optional()?;
        Ok(row)
    }

    fn find_post(&self, channel_id: ChannelId, message_id: i64) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM post WHERE channel_id = ?1 AND message_id = ?2");
        let row = self
            .conn
            .query_row(&sql, params![channel_id, message_id], post_from_row)
            .optional()?;
        Ok(row)
    }

    fn posts_for_channel(&self, channel_id: ChannelId) -> Result<Vec<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM post WHERE channel_id = ?1 ORDER BY message_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([channel_id], post_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn add_keyword_match(&self, post_id: PostId, keyword_id: KeywordId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO post_keyword_match (post_id, keyword_id) VALUES (?1, ?2)",
            params![post_id, keyword_id],
        )?;
        Ok(())
    }

    fn matched_keywords(&self, post_id: PostId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT k.text FROM post_keyword_match m
             JOIN keyword k ON k.id = m.keyword_id
             WHERE m.post_id = ?1
             ORDER BY k.id",
        )?;
        let rows = stmt
            .query_map([post_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// -- Post processing --

impl ProcessingRepo for Store<'_> {
    fn ensure_processing(&self, post_id: PostId, reviewer_id: ReviewerId) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO post_processing (post_id, reviewer_id, status)
             VALUES (?1, ?2, 'pending')",
            params![post_id, reviewer_id],
        )?;
        Ok(inserted == 1)
    }

    fn get_processing(&self, id: ProcessingId) -> Result<Option<PostProcessing>> {
        let sql = format!("SELECT {PROCESSING_COLUMNS} FROM post_processing WHERE id = ?1");
        let row = self.conn.query_row(&sql, [id], processing_from_row).optional()?;
        Ok(row)
    }

    fn list_for_post(&self, post_id: PostId) -> Result<Vec<PostProcessing>> {
        let sql = format!("SELECT {PROCESSING_COLUMNS} FROM post_processing WHERE post_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([post_id], processing_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn cas_resolve(
        &self,
        id: ProcessingId,
        status: ProcessingStatus,
        comment: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE post_processing
             SET status = ?2, comment = COALESCE(?3, comment), processed_at = ?4
             WHERE id = ?1 AND status = 'pending'",
            params![id, status.as_str(), comment, at],
        )?;
        Ok(changed == 1)
    }

    fn siblings(&self, post_id: PostId, exclude: ProcessingId) -> Result<Vec<PostProcessing>> {
        let sql = format!(
            "SELECT {PROCESSING_COLUMNS} FROM post_processing
             WHERE post_id = ?1 AND id <> ?2
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![post_id, exclude], processing_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn ignore_pending_siblings(
        &self,
        post_id: PostId,
        exclude: ProcessingId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE post_processing SET status = 'ignored', processed_at = ?3
             WHERE post_id = ?1 AND id <> ?2 AND status = 'pending'",
            params![post_id, exclude, at],
        )?;
        Ok(changed)
    }

    fn pending_undelivered(&self, published_since: DateTime<Utc>) -> Result<Vec<PendingDelivery>> {
        let mut stmt = self.conn.prepare(
            "SELECT pp.id, pp.post_id, pp.reviewer_id, r.telegram_id, r.language,
                    r.utc_offset_minutes, c.title, p.text, p.published_at, p.url
             FROM post_processing pp
             JOIN post p ON p.id = pp.post_id
             JOIN channel c ON c.id = p.channel_id
             JOIN reviewer r ON r.id = pp.reviewer_id
             WHERE pp.status = 'pending'
               AND pp.notify_message_id IS NULL
               AND r.is_active = 1
               AND p.published_at >= ?1
             ORDER BY pp.id",
        )?;

        let mut rows = stmt
            .query_map([published_since], |row| {
                Ok(PendingDelivery {
                    processing_id: row.get(0)?,
                    post_id: row.get(1)?,
                    reviewer_id: row.get(2)?,
                    chat_id: row.get(3)?,
                    language: row.get(4)?,
                    utc_offset_minutes: row.get(5)?,
                    channel_title: row.get(6)?,
                    text: row.get(7)?,
                    published_at: row.get(8)?,
                    url: row.get(9)?,
                    keywords: Vec::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for row in &mut rows {
            row.keywords = self.matched_keywords(row.post_id)?;
        }

        Ok(rows)
    }

    fn record_delivery(
        &self,
        id: ProcessingId,
        handle: DeliveryHandle,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE post_processing
             SET notify_chat_id = ?2, notify_message_id = ?3, notify_sent_at = ?4
             WHERE id = ?1 AND status = 'pending' AND notify_message_id IS NULL",
            params![id, handle.chat_id, handle.message_id, at],
        )?;
        Ok(changed == 1)
    }
}

// -- Row mapping --

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        api_id: row.get(2)?,
        api_hash: row.get(3)?,
        phone: row.get(4)?,
        description: row.get(5)?,
        is_active: row.get(6)?,
        is_authorized: row.get(7)?,
        session_blob: row.get(8)?,
        last_used: row.get(9)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        title: row.get(1)?,
        username: row.get(2)?,
        invite_link: row.get(3)?,
        status: parse_column(row, 4)?,
        last_parsed_message_id: row.get(5)?,
        last_checked: row.get(6)?,
    })
}

fn reviewer_from_row(row: &Row<'_>) -> rusqlite::Result<Reviewer> {
    Ok(Reviewer {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        role: parse_column(row, 3)?,
        is_active: row.get(4)?,
        language: row.get(5)?,
        utc_offset_minutes: row.get(6)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        message_id: row.get(2)?,
        text: row.get(3)?,
        media_type: row.get(4)?,
        published_at: row.get(5)?,
        url: row.get(6)?,
    })
}

fn processing_from_row(row: &Row<'_>) -> rusqlite::Result<PostProcessing> {
    let chat_id: Option<i64> = row.get(5)?;
    let message_id: Option<i64> = row.get(6)?;
    let delivery = match (chat_id, message_id) {
        (Some(chat_id), Some(message_id)) => Some(DeliveryHandle { chat_id, message_id }),
        _ => None,
    };

    Ok(PostProcessing {
        id: row.get(0)?,
        post_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        status: parse_column(row, 3)?,
        comment: row.get(4)?,
        delivery,
        notify_sent_at: row.get(7)?,
        processed_at: row.get(8)?,
    })
}
