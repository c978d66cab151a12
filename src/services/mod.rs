//! Service layer for the digest application.
//!
//! This module contains the collaborators of a run:
//! - Catalog collection (`ArxivCollector`)
//! - Ranking policies (`Ranker`)
//! - Language model summaries (`Summarizer`)
//! - Email delivery (`Notifier`)

pub mod arxiv;
pub mod notifier;
pub mod ranker;
pub mod summarizer;

pub use arxiv::{ArxivCollector, FetchError, RecordSource};
pub use notifier::{DeliveryError, MailTransport, Notifier, SmtpMailer};
pub use ranker::{KeywordPolicy, RankError, Ranker, Ranking, RankingPolicy, RecencyPolicy};
pub use summarizer::{ClaudeClient, LlmClient, Summarizer, SummaryError};
