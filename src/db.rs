//! Database module for pagechat
//!
//! Provides persistence for threads, messages and secure values.

mod schema;

use schema::SCHEMA;

use crate::conversation::{ContentItem, Message, PageContextSnapshot, Role, Thread};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Thread Operations ====================

    pub fn create_thread(&self, thread: &Thread) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO threads (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
            params![
                thread.id,
                thread.created_at.to_rfc3339(),
                thread.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn update_thread(&self, thread: &Thread) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![thread.updated_at.to_rfc3339(), thread.id],
        )?;
        if updated == 0 {
            return Err(DbError::ThreadNotFound(thread.id.clone()));
        }
        Ok(())
    }

    /// All threads, oldest first
    pub fn get_threads(&self) -> DbResult<Vec<Thread>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, created_at, updated_at FROM threads ORDER BY rowid ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(Thread {
                id: row.get(0)?,
                created_at: parse_datetime(&row.get::<_, String>(1)?),
                updated_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Message Operations ====================

    /// Append a message to its thread
    pub fn create_message(&self, message: &Message) -> DbResult<()> {
        let content = serde_json::to_string(&message.content)?;
        let context = message
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE thread_id = ?1",
            params![message.thread_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (message_id, thread_id, sequence_id, role, content, complete, error, context, response_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id,
                message.thread_id,
                sequence_id,
                message.role.to_string(),
                content,
                message.complete,
                message.error,
                context,
                message.response_id,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Rewrite the mutable columns of a stored message
    pub fn update_message(&self, message: &Message) -> DbResult<()> {
        let content = serde_json::to_string(&message.content)?;

        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages SET content = ?1, complete = ?2, error = ?3, response_id = ?4
             WHERE message_id = ?5",
            params![
                content,
                message.complete,
                message.error,
                message.response_id,
                message.id
            ],
        )?;
        if updated == 0 {
            return Err(DbError::MessageNotFound(message.id.clone()));
        }
        Ok(())
    }

    /// Messages of a thread in the order they were stored
    pub fn get_messages(&self, thread_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, thread_id, role, content, complete, error, context, response_id, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![thread_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Secure Values ====================

    pub fn get_secure_value(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM secure_values WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn save_secure_value(&self, key: &str, value: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO secure_values (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Parse a message row from the database
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let content: Vec<ContentItem> = serde_json::from_str(&content).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let context: Option<PageContextSnapshot> = row
        .get::<_, Option<String>>(6)?
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(Message {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::Assistant),
        content,
        complete: row.get(4)?,
        error: row.get(5)?,
        context,
        response_id: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
