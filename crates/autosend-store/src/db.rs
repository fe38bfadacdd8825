//! SQLite-backed persistence for messages and scheduler state.
//!
//! One connection behind a mutex; every operation is a short statement so the
//! lock is never held across an await point.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use autosend_core::error::{AutoSendError, Result};
use autosend_core::models::{
    Message, MessageStatus, SchedulerAction, SchedulerEvent, SchedulerState,
};
use autosend_core::traits::{MessageFilter, MessageSort, MessageStore, SchedulerStateStore};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

const MESSAGE_COLUMNS: &str =
    "id, recipient, content, status, created_at, sent_at, external_id, retry_count, error, updated_at";

/// SQLite store implementing every AutoSend persistence trait.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database. `:memory:` opens a private in-memory database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| store_err("DB open", e))?;

        // In-memory databases ignore WAL.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::debug!("🗄️ Store opened at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',   -- pending, sent, failed
                created_at TEXT NOT NULL,
                sent_at TEXT,
                external_id TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                updated_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_status_created
                ON messages (status, created_at);

            -- Singleton active flag, keyed by a fixed id
            CREATE TABLE IF NOT EXISTS scheduler_state (
                id TEXT PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                stopped_at TEXT,
                updated_at TEXT NOT NULL
            );

            -- Append-only start/stop audit log
            CREATE TABLE IF NOT EXISTS scheduler_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                action TEXT NOT NULL,            -- start, stop
                timestamp TEXT NOT NULL,
                start_id TEXT
            );

            CREATE TABLE IF NOT EXISTS delivery_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| store_err("Migration", e))
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AutoSendError::Store(format!("Lock: {e}")))
    }

    /// Every audit event in insertion order.
    pub fn list_events(&self) -> Result<Vec<SchedulerEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, action, timestamp, start_id FROM scheduler_events ORDER BY seq")
            .map_err(|e| store_err("List events", e))?;
        let rows = stmt
            .query_map([], event_from_row)
            .map_err(|e| store_err("List events", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| store_err("List events", e))
    }
}

pub(crate) fn store_err(context: &str, e: rusqlite::Error) -> AutoSendError {
    AutoSendError::Store(format!("{context}: {e}"))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<MessageStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let created_at: String = row.get(4)?;

    Ok(Message {
        id: row.get(0)?,
        to: row.get(1)?,
        content: row.get(2)?,
        status,
        created_at: parse_ts(4, &created_at)?,
        sent_at: parse_opt_ts(5, row.get(5)?)?,
        external_id: row.get(6)?,
        retry_count: row.get(7)?,
        error: row.get(8)?,
        updated_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<SchedulerEvent> {
    let action: String = row.get(1)?;
    let action = action
        .parse::<SchedulerAction>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    let timestamp: String = row.get(2)?;
    Ok(SchedulerEvent {
        id: row.get(0)?,
        action,
        timestamp: parse_ts(2, &timestamp)?,
        start_id: row.get(3)?,
    })
}

/// WHERE clause plus bound values for a filter.
fn where_clause(filter: &MessageFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(below) = filter.retry_count_below {
        conditions.push("retry_count < ?");
        values.push(Value::Integer(i64::from(below)));
    }
    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn order_clause(sort: MessageSort) -> &'static str {
    match sort {
        MessageSort::CreatedAsc => " ORDER BY created_at ASC",
        MessageSort::SentDesc => " ORDER BY sent_at DESC",
    }
}

impl SqliteStore {
    fn query_messages(
        &self,
        filter: &MessageFilter,
        sort: MessageSort,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let (where_sql, mut values) = where_clause(filter);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages{where_sql}{} LIMIT ? OFFSET ?",
            order_clause(sort)
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(skip as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| store_err("Query messages", e))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), message_from_row)
            .map_err(|e| store_err("Query messages", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| store_err("Read message row", e))
    }
}

// ─── Messages ──────────────────────────────────────

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    message.id,
                    message.to,
                    message.content,
                    message.status.as_str(),
                    ts(message.created_at),
                    message.sent_at.map(ts),
                    message.external_id,
                    message.retry_count,
                    message.error,
                    message.updated_at.map(ts),
                ],
            )
            .map_err(|e| store_err("Insert message", e))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        self.conn()?
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
            .map_err(|e| store_err("Get message", e))
    }

    async fn find(&self, filter: &MessageFilter, sort: MessageSort, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(filter, sort, 0, limit)
    }

    async fn update_status(
        &self,
        id: &str,
        status: MessageStatus,
        external_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = ts(Utc::now());
        let conn = self.conn()?;
        let changed = match status {
            MessageStatus::Sent => conn.execute(
                "UPDATE messages SET status = ?1, updated_at = ?2,
                    sent_at = CASE WHEN ?3 IS NULL THEN sent_at ELSE ?2 END,
                    external_id = COALESCE(?3, external_id)
                 WHERE id = ?4",
                params![status.as_str(), now, external_id, id],
            ),
            MessageStatus::Failed => conn.execute(
                "UPDATE messages SET status = ?1, updated_at = ?2,
                    retry_count = retry_count + 1,
                    error = COALESCE(?3, error)
                 WHERE id = ?4",
                params![status.as_str(), now, error, id],
            ),
            MessageStatus::Pending => conn.execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            ),
        }
        .map_err(|e| store_err("Update message status", e))?;

        if changed == 0 {
            return Err(AutoSendError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    async fn count(&self, filter: &MessageFilter) -> Result<u64> {
        let (where_sql, values) = where_clause(filter);
        let count: i64 = self
            .conn()?
            .query_row(
                &format!("SELECT COUNT(*) FROM messages{where_sql}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(|e| store_err("Count messages", e))?;
        Ok(count.max(0) as u64)
    }

    async fn find_page(
        &self,
        filter: &MessageFilter,
        sort: MessageSort,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.query_messages(filter, sort, skip, limit)
    }
}

// ─── Scheduler State ──────────────────────────────────────

#[async_trait]
impl SchedulerStateStore for SqliteStore {
    async fn get_or_create_default(&self, id: &str) -> Result<SchedulerState> {
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                "SELECT id, is_active, started_at, stopped_at, updated_at FROM scheduler_state WHERE id = ?1",
                [id],
                |row| {
                    let updated_at: String = row.get(4)?;
                    Ok(SchedulerState {
                        id: row.get(0)?,
                        is_active: row.get::<_, i32>(1)? != 0,
                        started_at: parse_opt_ts(2, row.get(2)?)?,
                        stopped_at: parse_opt_ts(3, row.get(3)?)?,
                        updated_at: parse_ts(4, &updated_at)?,
                    })
                },
            )
            .optional()
            .map_err(|e| store_err("Get scheduler state", e))?;

        if let Some(state) = existing {
            return Ok(state);
        }

        let state = SchedulerState::inactive(id);
        conn.execute(
            "INSERT OR IGNORE INTO scheduler_state (id, is_active, started_at, stopped_at, updated_at)
             VALUES (?1, 0, NULL, NULL, ?2)",
            params![state.id, ts(state.updated_at)],
        )
        .map_err(|e| store_err("Create scheduler state", e))?;
        tracing::debug!("Created default scheduler state '{id}'");
        Ok(state)
    }

    async fn upsert(&self, state: &SchedulerState) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO scheduler_state (id, is_active, started_at, stopped_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    state.id,
                    state.is_active as i32,
                    state.started_at.map(ts),
                    state.stopped_at.map(ts),
                    ts(state.updated_at),
                ],
            )
            .map_err(|e| store_err("Upsert scheduler state", e))?;
        Ok(())
    }

    async fn append_event(&self, event: &SchedulerEvent) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO scheduler_events (id, action, timestamp, start_id) VALUES (?1, ?2, ?3, ?4)",
                params![event.id, event.action.as_str(), ts(event.timestamp), event.start_id],
            )
            .map_err(|e| store_err("Append scheduler event", e))?;
        Ok(())
    }

    async fn latest_event(&self) -> Result<Option<SchedulerEvent>> {
        self.conn()?
            .query_row(
                "SELECT id, action, timestamp, start_id FROM scheduler_events ORDER BY seq DESC LIMIT 1",
                [],
                event_from_row,
            )
            .optional()
            .map_err(|e| store_err("Latest scheduler event", e))
    }
}
