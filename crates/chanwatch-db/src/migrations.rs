use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS account (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            api_id          TEXT NOT NULL,
            api_hash        TEXT NOT NULL,
            phone           TEXT NOT NULL,
            description     TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_authorized   INTEGER NOT NULL DEFAULT 0,
            session_blob    TEXT,
            last_used       TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channel (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            title                   TEXT NOT NULL,
            username                TEXT,
            invite_link             TEXT,
            status                  TEXT NOT NULL DEFAULT 'active',
            last_parsed_message_id  INTEGER,
            last_checked            TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_channel_status
            ON channel(status);

        CREATE TABLE IF NOT EXISTS keyword (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            text        TEXT NOT NULL,
            type        TEXT NOT NULL DEFAULT 'word',
            is_active   INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS reviewer (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id         INTEGER NOT NULL UNIQUE,
            username            TEXT,
            role                TEXT NOT NULL DEFAULT 'operator',
            is_active           INTEGER NOT NULL DEFAULT 1,
            language            TEXT,
            utc_offset_minutes  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS post (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id      INTEGER NOT NULL REFERENCES channel(id),
            message_id      INTEGER NOT NULL,
            text            TEXT NOT NULL DEFAULT '',
            media_type      TEXT,
            published_at    TEXT NOT NULL,
            url             TEXT,
            UNIQUE(channel_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_post_published
            ON post(published_at);

        CREATE TABLE IF NOT EXISTS post_keyword_match (
            post_id     INTEGER NOT NULL REFERENCES post(id),
            keyword_id  INTEGER NOT NULL REFERENCES keyword(id),
            UNIQUE(post_id, keyword_id)
        );

        CREATE TABLE IF NOT EXISTS post_processing (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id             INTEGER NOT NULL REFERENCES post(id),
            reviewer_id         INTEGER NOT NULL REFERENCES reviewer(id),
            status              TEXT NOT NULL DEFAULT 'pending',
            comment             TEXT,
            notify_chat_id      INTEGER,
            notify_message_id   INTEGER,
            notify_sent_at      TEXT,
            processed_at        TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(post_id, reviewer_id)
        );

        CREATE INDEX IF NOT EXISTS idx_processing_pending
            ON post_processing(status, notify_message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
