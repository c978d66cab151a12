// src/error.rs

//! Unified error handling for the digest application.
//!
//! Every fatal condition of an invocation ends up as an [`AppError`], and
//! [`AppError::exit_code`] maps it onto the process exit codes other tooling
//! depends on.

use std::fmt;

use thiserror::Error;

/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for configuration and storage faults.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code when the catalog stayed unavailable after all retries.
pub const EXIT_SOURCE: i32 = 2;
/// Exit code when too many summaries failed.
pub const EXIT_SUMMARY: i32 = 3;
/// Exit code for fatal delivery failures, authentication included.
pub const EXIT_DELIVERY: i32 = 4;
/// Exit code when there was nothing to process. Informational.
pub const EXIT_EMPTY: i32 = 5;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed outside of a retried call
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite reported a fault
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored data could not be decoded
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The catalog could not be reached after all retries
    #[error("Source unavailable after {attempts} attempt(s): {message}")]
    SourceUnavailable { attempts: u32, message: String },

    /// More than half of a summary batch failed
    #[error("Summarization failed for {failed} of {total} records")]
    SummaryBatch { failed: usize, total: usize },

    /// Delivery failed after retries or with a permanent error
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// The mail server rejected our credentials
    #[error("Delivery authentication failed: {0}")]
    DeliveryAuth(String),

    /// Message rendering failed
    #[error("Template error: {0}")]
    Template(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a source-unavailable error.
    pub fn source_unavailable(attempts: u32, message: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            attempts,
            message: message.to_string(),
        }
    }

    /// Create a delivery error.
    pub fn delivery(message: impl fmt::Display) -> Self {
        Self::Delivery(message.to_string())
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_)
            | Self::Toml(_)
            | Self::Url(_)
            | Self::Sqlite(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Validation(_) => EXIT_CONFIG,
            Self::Http(_) | Self::SourceUnavailable { .. } => EXIT_SOURCE,
            Self::SummaryBatch { .. } => EXIT_SUMMARY,
            Self::Delivery(_) | Self::DeliveryAuth(_) | Self::Template(_) => EXIT_DELIVERY,
        }
    }

    /// Short name of the variant, used in alert messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "IoError",
            Self::Http(_) => "HttpError",
            Self::Toml(_) => "TomlError",
            Self::Url(_) => "UrlError",
            Self::Sqlite(_) | Self::Storage(_) => "StorageError",
            Self::Config(_) => "ConfigError",
            Self::Validation(_) => "ValidationError",
            Self::SourceUnavailable { .. } => "SourceUnavailable",
            Self::SummaryBatch { .. } => "SummaryBatchFailure",
            Self::Delivery(_) => "DeliveryError",
            Self::DeliveryAuth(_) => "DeliveryAuthError",
            Self::Template(_) => "TemplateError",
        }
    }
}

/// Human-readable meaning of an exit code.
pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        EXIT_SUCCESS => "Success",
        EXIT_CONFIG => "Configuration or storage error",
        EXIT_SOURCE => "arXiv API error",
        EXIT_SUMMARY => "Summarization error",
        EXIT_DELIVERY => "Email sending error",
        EXIT_EMPTY => "No records to process",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(AppError::config("x").exit_code(), EXIT_CONFIG);
        assert_eq!(AppError::storage("locked").exit_code(), EXIT_CONFIG);
        assert_eq!(AppError::source_unavailable(3, "down").exit_code(), EXIT_SOURCE);
        assert_eq!(
            AppError::SummaryBatch { failed: 3, total: 4 }.exit_code(),
            EXIT_SUMMARY
        );
        assert_eq!(AppError::DeliveryAuth("535".into()).exit_code(), EXIT_DELIVERY);
        assert_eq!(AppError::delivery("timeout").exit_code(), EXIT_DELIVERY);
    }

    #[test]
    fn describe_known_and_unknown_codes() {
        assert_eq!(describe_exit_code(EXIT_EMPTY), "No records to process");
        assert_eq!(describe_exit_code(42), "Unknown error");
    }
}
