//! SQLite storage implementation.
//!
//! ## Schema
//!
//! ```text
//! pending(id PK, title, abstract, categories, published_at, fetched_at, url)
//! processed(id PK, title, processed_at, batch_date, selected)
//! runs(id PK AUTOINCREMENT, kind, timestamp, count, status, error)
//! ```
//!
//! Timestamps are stored as RFC 3339 UTC strings, categories as a
//! comma-joined string. Writes run inside `BEGIN IMMEDIATE` transactions
//! with a zero busy timeout, so a second writer fails instead of queueing.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::error::{AppError, Result};
use crate::models::{Record, RunKind, RunRecord, RunStatus};
use crate::storage::RecordStore;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pending (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    abstract TEXT NOT NULL,
    categories TEXT NOT NULL,
    published_at TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed (
    id TEXT PRIMARY KEY,
    title TEXT,
    processed_at TEXT NOT NULL,
    batch_date TEXT NOT NULL,
    selected INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    count INTEGER NOT NULL,
    status TEXT NOT NULL,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_kind_status ON runs(kind, status);
"#;

/// SQLite-backed record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn).inspect(|_| log::info!("Opened staging store at {}", path.display()))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::storage("connection lock poisoned"))
    }

    /// IDs in `processed` with their selection flag, ordered by ID.
    pub fn processed_flags(&self) -> Result<Vec<(String, bool)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, selected FROM processed ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Whether `id` is currently pending.
    pub fn is_pending(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM pending WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn try_append_run(
        &self,
        kind: RunKind,
        count: usize,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (kind, timestamp, count, status, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                format_timestamp(Utc::now()),
                count as i64,
                status.as_str(),
                error
            ],
        )?;
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    fn insert_if_new(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let fetched_at = format_timestamp(Utc::now());
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pending
                    (id, title, abstract, categories, published_at, fetched_at, url)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
                 WHERE NOT EXISTS (SELECT 1 FROM processed WHERE id = ?1)",
            )?;
            for record in records {
                inserted += stmt.execute(params![
                    record.id,
                    record.title,
                    record.abstract_text,
                    record.categories.join(","),
                    format_timestamp(record.published_at),
                    fetched_at,
                    record.url,
                ])?;
            }
        }
        tx.commit()?;

        log::info!(
            "Added {} new records to pending (skipped {} duplicates)",
            inserted,
            records.len() - inserted
        );
        Ok(inserted)
    }

    fn load_all_pending(&self) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, abstract, categories, published_at, url FROM pending",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, title, abstract_text, categories, published_at, url) = row?;
            records.push(Record {
                id,
                title,
                abstract_text,
                categories: categories
                    .split(',')
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect(),
                published_at: parse_timestamp(&published_at)?,
                url,
            });
        }

        log::info!("Retrieved {} pending records", records.len());
        Ok(records)
    }

    fn promote_to_processed(
        &self,
        records: &[Record],
        batch_date: DateTime<Utc>,
        selected_ids: &HashSet<String>,
    ) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let processed_at = format_timestamp(Utc::now());
        let batch_date = format_timestamp(batch_date);
        let mut promoted = 0;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO processed (id, title, processed_at, batch_date, selected)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut remove = tx.prepare("DELETE FROM pending WHERE id = ?1")?;
            for record in records {
                let selected = selected_ids.contains(&record.id);
                promoted += insert.execute(params![
                    record.id,
                    record.title,
                    processed_at,
                    batch_date,
                    selected as i64
                ])?;
                remove.execute(params![record.id])?;
            }
        }
        tx.commit()?;

        log::info!(
            "Marked {} records as processed ({} selected, {} already processed)",
            promoted,
            selected_ids.len(),
            records.len() - promoted
        );
        Ok(promoted)
    }

    fn append_run(&self, kind: RunKind, count: usize, status: RunStatus, error: Option<&str>) {
        match self.try_append_run(kind, count, status, error) {
            Ok(()) => log::debug!("Logged {} run: status={}, count={}", kind, status, count),
            Err(e) => log::error!("Failed to log {} run ({}): {}", kind, status, e),
        }
    }

    fn last_successful_run(&self, kind: RunKind) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let timestamp: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM runs WHERE kind = ?1 AND status = 'success'
                 ORDER BY id DESC LIMIT 1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        timestamp.as_deref().map(parse_timestamp).transpose()
    }

    fn pending_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn processed_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, timestamp, count, status, error FROM runs
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, kind, timestamp, count, status, error) = row?;
            runs.push(RunRecord {
                id,
                kind: kind.parse()?,
                timestamp: parse_timestamp(&timestamp)?,
                count: count as usize,
                status: status.parse()?,
                error,
            });
        }
        Ok(runs)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::storage(format!("invalid timestamp '{value}': {e}")))
}
