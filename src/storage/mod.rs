//! Durable staging store for paper records.
//!
//! Records live in exactly one of two tables:
//!
//! ```text
//! pending    # fetched, waiting for the next delivery cycle
//! processed  # already considered by a delivery cycle (selected or not)
//! runs       # append-only log, one row per invocation
//! ```
//!
//! A record moves `pending -> processed` once and never back.

pub mod sqlite;

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Record, RunKind, RunRecord, RunStatus};

// Re-export for convenience
pub use sqlite::SqliteStore;

/// Trait for record storage backends.
pub trait RecordStore: Send + Sync {
    /// Insert records into `pending` unless their ID is already pending or
    /// processed. Duplicates are skipped silently. All-or-nothing per call.
    ///
    /// Returns the number of rows inserted.
    fn insert_if_new(&self, records: &[Record]) -> Result<usize>;

    /// Every pending record, in no particular order.
    fn load_all_pending(&self) -> Result<Vec<Record>>;

    /// Move `records` to `processed`, flagging the ones in `selected_ids`.
    ///
    /// Already-processed IDs are skipped. Returns the number of newly
    /// processed rows.
    fn promote_to_processed(
        &self,
        records: &[Record],
        batch_date: DateTime<Utc>,
        selected_ids: &HashSet<String>,
    ) -> Result<usize>;

    /// Append a run log entry. Storage faults are logged, never returned.
    fn append_run(&self, kind: RunKind, count: usize, status: RunStatus, error: Option<&str>);

    /// Timestamp of the latest successful run of `kind`.
    fn last_successful_run(&self, kind: RunKind) -> Result<Option<DateTime<Utc>>>;

    /// Number of pending rows.
    fn pending_count(&self) -> Result<usize>;

    /// Number of processed rows.
    fn processed_count(&self) -> Result<usize>;

    /// Most recent run entries, newest first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>>;
}
