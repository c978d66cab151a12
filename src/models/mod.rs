// src/models/mod.rs

//! Domain models for the digest application.

mod config;
mod record;

// Re-export all public types
pub use config::{
    Config, DeliveryConfig, EmailConfig, LoggingConfig, NotificationConfig, PromotionPolicy,
    RankingConfig, SourceConfig, StorageConfig, SummarizerConfig, is_valid_email, split_list,
};
pub use record::{
    RankedRecord, Record, RunKind, RunOutcome, RunRecord, RunStatus, SummarizedRecord, Summary,
};
