// src/pipeline/accumulate.rs

//! Accumulation run.

use crate::error::Result;
use crate::models::{RunKind, RunOutcome, RunStatus};

use super::Pipeline;

impl Pipeline<'_> {
    /// Fetch the newest records and stage the unseen ones.
    ///
    /// Only records published after the last successful accumulation are
    /// requested. A run that brings nothing new ends as
    /// [`RunOutcome::Empty`].
    pub async fn accumulate(&mut self) -> Result<RunOutcome> {
        let since = self.store.last_successful_run(RunKind::Accumulate)?;
        let records = self
            .source
            .fetch_latest(self.config.source.fetch_limit, since)
            .await?;
        self.stats.fetched = Some(records.len());

        if records.is_empty() {
            log::info!("No new papers found");
            self.store
                .append_run(RunKind::Accumulate, 0, RunStatus::Empty, None);
            return Ok(RunOutcome::Empty);
        }

        let inserted = self.store.insert_if_new(&records)?;
        self.stats.inserted = Some(inserted);
        self.stats.pending = Some(self.store.pending_count()?);

        if inserted == 0 {
            log::info!("All {} fetched papers were already known", records.len());
            self.store
                .append_run(RunKind::Accumulate, 0, RunStatus::Empty, None);
            return Ok(RunOutcome::Empty);
        }

        log::info!(
            "Stored {} new papers ({} duplicates skipped)",
            inserted,
            records.len().saturating_sub(inserted)
        );
        self.store
            .append_run(RunKind::Accumulate, inserted, RunStatus::Success, None);
        Ok(RunOutcome::Success { count: inserted })
    }
}
