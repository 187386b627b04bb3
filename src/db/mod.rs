//! SQLite-backed durable state: cities, meetings, items, attachments,
//! matters, and the processing queue.
//!
//! The database lives at `~/.gavel/gavel.db`. WAL mode keeps reads cheap
//! while the conductor and workers write; all multi-row writes go through
//! `with_transaction` so readers never observe a half-loaded item set.
//! Callers share the store behind a non-poisoning mutex and hold the lock
//! only around individual calls, never across network I/O.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

pub mod types;
pub use types::*;

mod cities;
mod items;
mod matters;
mod meetings;
mod queue;

/// Store shared across the conductor and worker tasks.
pub type SharedStore = Arc<Mutex<Store>>;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at the given path and apply the schema.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        // WAL for concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Wrap a store for sharing across tasks.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Borrow the underlying connection for ad-hoc queries (health checks).
    pub(crate) fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

/// Canonical timestamp format: fixed-width RFC 3339 with millisecond
/// precision and a `Z` suffix, so lexicographic comparison in SQL matches
/// chronological order.
pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A timestamp `seconds` in the past, same format as [`now_str`].
pub(crate) fn ago_str(seconds: i64) -> String {
    (Utc::now() - chrono::Duration::seconds(seconds))
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
