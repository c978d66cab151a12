// src/pipeline/deliver.rs

//! Delivery run.

use std::collections::HashSet;

use chrono::Utc;

use crate::error::Result;
use crate::models::{PromotionPolicy, RankedRecord, Record, RunKind, RunOutcome, RunStatus};

use super::Pipeline;

/// Take the first `limit` ranked records.
///
/// With `require_match`, records without any keyword match are skipped.
pub fn select(ranked: Vec<RankedRecord>, limit: usize, require_match: bool) -> Vec<RankedRecord> {
    ranked
        .into_iter()
        .filter(|r| !require_match || r.has_matches())
        .take(limit)
        .collect()
}

/// `"Feb 01 - Feb 07, 2026"` spanning the publication dates of `records`.
pub fn date_range_label(records: &[Record]) -> Option<String> {
    let first = records.iter().map(|r| r.published_at).min()?;
    let last = records.iter().map(|r| r.published_at).max()?;
    Some(format!(
        "{} - {}",
        first.format("%b %d"),
        last.format("%b %d, %Y")
    ))
}

impl Pipeline<'_> {
    /// Rank, summarize and send the pending batch, then mark it processed.
    ///
    /// Every loaded record is promoted, flagged by whether it made the
    /// selection. Under [`PromotionPolicy::Always`] this happens even when
    /// the digest could not be sent; under [`PromotionPolicy::OnDelivery`]
    /// a failed send leaves the batch pending. A failed summary batch stops
    /// the run before anything is promoted.
    pub async fn deliver(&mut self) -> Result<RunOutcome> {
        let pending = self.store.load_all_pending()?;
        self.stats.pending = Some(pending.len());

        if pending.is_empty() {
            log::info!("No pending papers to deliver");
            self.store
                .append_run(RunKind::Deliver, 0, RunStatus::Empty, None);
            return Ok(RunOutcome::Empty);
        }
        log::info!("Loaded {} pending papers", pending.len());

        let settings = &self.config.ranking;
        let ranking = self.ranker.rank(&pending);
        let mut require_match = settings.require_keyword_match && !settings.keywords.is_empty();
        if require_match && ranking.fallback {
            log::warn!("Keyword ranking unavailable, selecting without required matches");
            require_match = false;
        }
        let selected = select(ranking.records, settings.display_limit, require_match);
        self.stats.selected = Some(selected.len());

        let batch_date = Utc::now();
        let selected_ids: HashSet<String> =
            selected.iter().map(|r| r.record.id.clone()).collect();

        if selected.is_empty() {
            log::info!("No pending paper matched the interest keywords");
            let promoted = self
                .store
                .promote_to_processed(&pending, batch_date, &selected_ids)?;
            self.stats.promoted = Some(promoted);
            self.store
                .append_run(RunKind::Deliver, 0, RunStatus::Empty, None);
            return Ok(RunOutcome::Empty);
        }
        log::info!(
            "Selected top {} of {} papers",
            selected.len(),
            pending.len()
        );

        let summarized = self.summarizer.summarize_batch(&selected).await?;
        self.stats.summaries_unavailable = Some(
            summarized
                .iter()
                .filter(|s| !s.summary.is_available())
                .count(),
        );

        let period = date_range_label(&pending).unwrap_or_default();
        let delivery = self
            .notifier
            .deliver_digest(&summarized, pending.len(), &period, &settings.keywords)
            .await;

        let promotion = match (self.config.delivery.promotion, &delivery) {
            (PromotionPolicy::OnDelivery, Err(_)) => {
                log::warn!(
                    "Digest not delivered, leaving {} papers pending",
                    pending.len()
                );
                Ok(0)
            }
            _ => self
                .store
                .promote_to_processed(&pending, batch_date, &selected_ids),
        };

        match &promotion {
            Ok(promoted) => self.stats.promoted = Some(*promoted),
            Err(e) => log::error!("Failed to mark papers processed: {}", e),
        }
        // A failed send outranks a failed promotion.
        delivery?;
        let promoted = promotion?;
        log::info!(
            "Marked {} papers processed ({} selected)",
            promoted,
            selected_ids.len()
        );

        self.store
            .append_run(RunKind::Deliver, summarized.len(), RunStatus::Success, None);
        Ok(RunOutcome::Success {
            count: summarized.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(id: &str, month: u32, day: u32) -> Record {
        Record {
            id: id.into(),
            title: String::new(),
            abstract_text: String::new(),
            categories: Vec::new(),
            published_at: Utc.with_ymd_and_hms(2026, month, day, 10, 0, 0).unwrap(),
            url: String::new(),
        }
    }

    fn ranked(id: &str, matched: bool) -> RankedRecord {
        RankedRecord {
            record: record(id, 2, 1),
            score: if matched { 3.0 } else { 0.0 },
            matched_keywords: if matched { vec!["llm".into()] } else { Vec::new() },
        }
    }

    #[test]
    fn select_truncates_in_rank_order() {
        let ranked = vec![ranked("a", true), ranked("b", false), ranked("c", false)];
        let ids: Vec<String> = select(ranked, 2, false)
            .into_iter()
            .map(|r| r.record.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn select_can_require_matches() {
        let ranked = vec![ranked("a", true), ranked("b", false), ranked("c", true)];
        let ids: Vec<String> = select(ranked, 5, true)
            .into_iter()
            .map(|r| r.record.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn date_range_spans_batch() {
        let records = vec![record("b", 2, 7), record("a", 1, 30), record("c", 2, 3)];
        assert_eq!(
            date_range_label(&records).as_deref(),
            Some("Jan 30 - Feb 07, 2026")
        );
        assert_eq!(date_range_label(&[]), None);
    }
}
