pub mod migrations;
pub mod models;
pub mod queries;
pub mod repos;

use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// How long a write waits on another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub use repos::{AccountRepo, ChannelRepo, KeywordRepo, PostRepo, ProcessingRepo, ReviewerRepo};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private, throwaway database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction. Everything `f` writes through the
    /// [`Store`] commits together, or not at all if `f` returns an error.
    pub fn unit_of_work<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        // Take the write lock up front so a concurrent instance waits on
        // the busy timeout instead of failing mid-transaction.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&Store::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }
}

/// Repository view over one connection or transaction.
///
/// Implements every repository trait in [`repos`], so engine code can ask
/// for exactly the capabilities it needs (`impl PostRepo + ProcessingRepo`).
pub struct Store<'c> {
    conn: &'c Connection,
}

impl<'c> Store<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_database_waits_for_other_writers() {
        let path = std::env::temp_dir().join(format!("chanwatch-busy-{}.db", std::process::id()));
        let db = Database::open(&path).unwrap();
        let other = Database::open(&path).unwrap();

        let timeout: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, BUSY_TIMEOUT.as_millis() as i64);

        // Two handles on one file both get to write.
        db.unit_of_work(|store| store.insert_keyword("breach", chanwatch_types::models::KeywordKind::Word))
            .unwrap();
        other
            .unit_of_work(|store| store.insert_keyword("leak", chanwatch_types::models::KeywordKind::Phrase))
            .unwrap();
        assert_eq!(db.unit_of_work(|store| store.list_active_keywords()).unwrap().len(), 2);

        drop((db, other));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
