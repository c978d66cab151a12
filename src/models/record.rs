//! Paper records and the run log entries written alongside them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One catalog entry tracked by the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    /// arXiv identifier, version suffix included (e.g. `2401.01234v1`)
    pub id: String,

    /// Paper title
    pub title: String,

    /// Abstract text
    pub abstract_text: String,

    /// Category tags in catalog order, without duplicates
    pub categories: Vec<String>,

    /// Publication timestamp
    pub published_at: DateTime<Utc>,

    /// Abstract page URL
    pub url: String,
}

/// A record with its ranking score and the keywords it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRecord {
    pub record: Record,
    pub score: f64,
    pub matched_keywords: Vec<String>,
}

impl RankedRecord {
    /// Whether any interest keyword matched this record.
    pub fn has_matches(&self) -> bool {
        !self.matched_keywords.is_empty()
    }
}

/// Generated synopsis, or the reason generation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Generated(String),
    Unavailable(String),
}

impl Summary {
    pub fn is_available(&self) -> bool {
        matches!(self, Summary::Generated(_))
    }

    /// Text shown in the digest card.
    pub fn display_text(&self) -> String {
        match self {
            Summary::Generated(text) => text.clone(),
            Summary::Unavailable(reason) => format!("[Summary unavailable: {reason}]"),
        }
    }
}

/// A ranked record paired with its summary for one delivery cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedRecord {
    pub ranked: RankedRecord,
    pub summary: Summary,
}

impl SummarizedRecord {
    pub fn record(&self) -> &Record {
        &self.ranked.record
    }
}

/// The two invocation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Accumulate,
    Deliver,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Accumulate => "accumulate",
            RunKind::Deliver => "deliver",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accumulate" | "ingest" => Ok(RunKind::Accumulate),
            "deliver" | "digest" => Ok(RunKind::Deliver),
            other => Err(AppError::storage(format!("unknown run kind '{other}'"))),
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Empty,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Empty => "empty",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            "empty" => Ok(RunStatus::Empty),
            other => Err(AppError::storage(format!("unknown run status '{other}'"))),
        }
    }
}

/// Append-only run log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub kind: RunKind,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Non-error end state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Work was done; `count` records inserted or delivered.
    Success { count: usize },
    /// Nothing to process.
    Empty,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success { .. } => crate::error::EXIT_SUCCESS,
            RunOutcome::Empty => crate::error::EXIT_EMPTY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_summary_carries_reason() {
        let summary = Summary::Unavailable("rate limited".into());
        assert!(!summary.is_available());
        assert_eq!(summary.display_text(), "[Summary unavailable: rate limited]");
    }

    #[test]
    fn run_kind_accepts_legacy_names() {
        assert_eq!("ingest".parse::<RunKind>().unwrap(), RunKind::Accumulate);
        assert_eq!("digest".parse::<RunKind>().unwrap(), RunKind::Deliver);
        assert!("weekly".parse::<RunKind>().is_err());
    }

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(RunOutcome::Success { count: 3 }.exit_code(), 0);
        assert_eq!(RunOutcome::Empty.exit_code(), 5);
    }
}
