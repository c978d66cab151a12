//! Ranking policies for a delivery batch.
//!
//! Two strategies share one interface: [`KeywordPolicy`] scores records by
//! interest keywords, [`RecencyPolicy`] orders them newest first. [`Ranker`]
//! picks the policy from configuration and falls back to recency when the
//! keyword policy fails. Ranking never drops records; selection is the
//! caller's job.

use std::cmp::Ordering;

use thiserror::Error;

use crate::models::{RankedRecord, RankingConfig, Record};

/// Points for a keyword found in the title.
pub const TITLE_WEIGHT: f64 = 3.0;
/// Points for a keyword found in the abstract.
pub const ABSTRACT_WEIGHT: f64 = 1.0;
/// Most points the abstract can contribute.
pub const ABSTRACT_CAP: f64 = 3.0;

/// Ranking failure. Always recoverable by falling back to recency.
#[derive(Debug, Error, PartialEq)]
pub enum RankError {
    #[error("keyword #{index} is blank")]
    BlankKeyword { index: usize },

    #[error("score for {id} is not a finite number")]
    NonFiniteScore { id: String },
}

/// A strategy producing a total order over records.
pub trait RankingPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Score and sort every record, highest score first.
    fn rank(&self, records: &[Record]) -> Result<Vec<RankedRecord>, RankError>;
}

/// Newest first; ties broken by ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyPolicy;

impl RankingPolicy for RecencyPolicy {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn rank(&self, records: &[Record]) -> Result<Vec<RankedRecord>, RankError> {
        let mut ranked: Vec<RankedRecord> = records
            .iter()
            .map(|record| RankedRecord {
                score: record.published_at.timestamp_millis() as f64 / 1000.0,
                matched_keywords: Vec::new(),
                record: record.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.record
                .published_at
                .cmp(&a.record.published_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        Ok(ranked)
    }
}

/// Case-insensitive substring scoring against title and abstract.
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    /// (original spelling, lowercased) with case-insensitive duplicates removed
    keywords: Vec<(String, String)>,
}

impl KeywordPolicy {
    pub fn new(keywords: &[String]) -> Self {
        let mut unique: Vec<(String, String)> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let lowered = keyword.to_lowercase();
            if !unique.iter().any(|(_, l)| *l == lowered) {
                unique.push((keyword.clone(), lowered));
            }
        }
        Self { keywords: unique }
    }

    /// Score one record, returning the score and matched keywords.
    pub fn score(&self, record: &Record) -> (f64, Vec<String>) {
        let title = record.title.to_lowercase();
        let abstract_text = record.abstract_text.to_lowercase();

        let mut title_hits = 0usize;
        let mut abstract_hits = 0usize;
        let mut matched = Vec::new();

        for (keyword, lowered) in &self.keywords {
            let in_title = title.contains(lowered.as_str());
            let in_abstract = abstract_text.contains(lowered.as_str());
            if in_title {
                title_hits += 1;
            }
            if in_abstract {
                abstract_hits += 1;
            }
            if in_title || in_abstract {
                matched.push(keyword.clone());
            }
        }

        let score = TITLE_WEIGHT * title_hits as f64
            + (ABSTRACT_WEIGHT * abstract_hits as f64).min(ABSTRACT_CAP);
        (score, matched)
    }
}

impl RankingPolicy for KeywordPolicy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn rank(&self, records: &[Record]) -> Result<Vec<RankedRecord>, RankError> {
        if let Some(index) = self.keywords.iter().position(|(_, l)| l.trim().is_empty()) {
            return Err(RankError::BlankKeyword { index });
        }

        let mut ranked = Vec::with_capacity(records.len());
        for record in records {
            let (score, matched_keywords) = self.score(record);
            if !score.is_finite() {
                return Err(RankError::NonFiniteScore {
                    id: record.id.clone(),
                });
            }
            ranked.push(RankedRecord {
                record: record.clone(),
                score,
                matched_keywords,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.published_at.cmp(&a.record.published_at))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        Ok(ranked)
    }
}

/// Free-standing ranking over an explicit keyword list.
pub fn rank(records: &[Record], keywords: &[String]) -> Result<Vec<RankedRecord>, RankError> {
    if keywords.is_empty() {
        RecencyPolicy.rank(records)
    } else {
        KeywordPolicy::new(keywords).rank(records)
    }
}

/// Outcome of [`Ranker::rank`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub records: Vec<RankedRecord>,
    /// The primary policy failed and the order is chronological.
    pub fallback: bool,
}

/// Configured ranking with a recency fallback.
pub struct Ranker {
    primary: Box<dyn RankingPolicy>,
    fallback: RecencyPolicy,
}

impl Ranker {
    /// Build from configuration: keywords select the keyword policy.
    pub fn from_config(config: &RankingConfig) -> Self {
        if config.keywords.is_empty() {
            log::info!("No interest keywords configured, ranking by recency");
            Self::with_policy(Box::new(RecencyPolicy))
        } else {
            log::info!(
                "Ranking by {} keywords: {}",
                config.keywords.len(),
                config.keywords.join(", ")
            );
            Self::with_policy(Box::new(KeywordPolicy::new(&config.keywords)))
        }
    }

    pub fn with_policy(primary: Box<dyn RankingPolicy>) -> Self {
        Self {
            primary,
            fallback: RecencyPolicy,
        }
    }

    /// Rank with the primary policy, falling back to recency on failure.
    pub fn rank(&self, records: &[Record]) -> Ranking {
        match self.primary.rank(records) {
            Ok(ranked) => {
                log::info!(
                    "Ranked {} records by {}",
                    ranked.len(),
                    self.primary.name()
                );
                Ranking {
                    records: ranked,
                    fallback: false,
                }
            }
            Err(e) => {
                log::error!(
                    "Ranking by {} failed: {}, falling back to chronological order",
                    self.primary.name(),
                    e
                );
                Ranking {
                    records: self.rank_chronologically(records),
                    fallback: true,
                }
            }
        }
    }

    fn rank_chronologically(&self, records: &[Record]) -> Vec<RankedRecord> {
        // Recency ranking has no failure path.
        self.fallback.rank(records).unwrap_or_default()
    }
}
