//! Pipeline entry points for digest runs.
//!
//! - `Pipeline::accumulate`: fetch new records into the staging store
//! - `Pipeline::deliver`: rank, summarize and send the pending batch
//!
//! - `Pipeline::run`: one of the two, ending in an exit code
//!
//! Each invocation runs exactly one of the two. On success the run is
//! recorded in the store; on failure the error propagates to `run`, which
//! logs the error run and raises the alert.

mod accumulate;
mod deliver;
mod runner;

pub use deliver::{date_range_label, select};
pub use runner::abort;

use crate::models::Config;
use crate::services::{Notifier, Ranker, RecordSource, Summarizer};
use crate::storage::RecordStore;

/// Counters gathered during a run, attached to alerts and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub fetched: Option<usize>,
    pub inserted: Option<usize>,
    pub pending: Option<usize>,
    pub selected: Option<usize>,
    pub summaries_unavailable: Option<usize>,
    pub promoted: Option<usize>,
}

impl RunStats {
    /// Labelled counters that were reached.
    pub fn as_pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("Papers fetched", self.fetched),
            ("New papers stored", self.inserted),
            ("Pending papers", self.pending),
            ("Papers selected", self.selected),
            ("Summaries unavailable", self.summaries_unavailable),
            ("Papers marked processed", self.promoted),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| (label, v.to_string())))
        .collect()
    }
}

/// Collaborators for one invocation.
pub struct Pipeline<'a> {
    config: &'a Config,
    store: &'a dyn RecordStore,
    source: &'a dyn RecordSource,
    summarizer: &'a Summarizer,
    notifier: &'a Notifier,
    ranker: Ranker,
    stats: RunStats,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn RecordStore,
        source: &'a dyn RecordSource,
        summarizer: &'a Summarizer,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            config,
            store,
            source,
            summarizer,
            notifier,
            ranker: Ranker::from_config(&config.ranking),
            stats: RunStats::default(),
        }
    }

    /// Counters of the current run so far.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_skip_unreached_counters() {
        let stats = RunStats {
            pending: Some(90),
            selected: Some(15),
            ..RunStats::default()
        };
        assert_eq!(
            stats.as_pairs(),
            vec![
                ("Pending papers", "90".to_string()),
                ("Papers selected", "15".to_string())
            ]
        );
    }
}
