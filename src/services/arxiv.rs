// src/services/arxiv.rs

//! arXiv collector service.
//!
//! Queries the arXiv Atom API for the newest papers in the configured
//! categories and turns feed entries into [`Record`]s. Transient failures are
//! retried with a delay that depends on the failure class; anything else
//! fails the run as "source unavailable".

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, Record, SourceConfig};
use crate::utils::{http, normalize_whitespace};

/// Source of candidate records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch up to `limit` newest records, optionally only those published
    /// after `since`. An empty result is not an error.
    async fn fetch_latest(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>>;
}

/// Failure of a single catalog request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by arXiv")]
    RateLimited,

    #[error("arXiv server error {0}")]
    Server(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("arXiv rejected the request with status {0}")]
    Rejected(u16),

    #[error("malformed feed: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Delay before the next attempt, or `None` when retrying is pointless.
    ///
    /// `attempt` is zero-based.
    pub fn retry_delay(&self, attempt: u32, config: &SourceConfig) -> Option<Duration> {
        match self {
            FetchError::RateLimited => Some(Duration::from_secs(
                config
                    .rate_limit_base_secs
                    .saturating_mul(2u64.saturating_pow(attempt)),
            )),
            FetchError::Server(_) => Some(Duration::from_secs(config.server_error_delay_secs)),
            FetchError::Network(_) => Some(Duration::from_secs(config.network_error_delay_secs)),
            FetchError::Rejected(_) | FetchError::Malformed(_) => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            FetchError::RateLimited
        } else if status.is_server_error() {
            FetchError::Server(status.as_u16())
        } else {
            FetchError::Rejected(status.as_u16())
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Collector backed by the public arXiv API.
pub struct ArxivCollector {
    config: SourceConfig,
    client: Client,
}

impl ArxivCollector {
    /// Create a collector with its own HTTP client.
    pub fn new(config: &Config) -> Result<Self> {
        let client = http::create_client(&config.source.user_agent, config.source.timeout_secs)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &Config, client: Client) -> Self {
        Self {
            config: config.source.clone(),
            client,
        }
    }

    /// Search query combining categories (OR) with the optional extra query.
    pub fn build_query(&self) -> String {
        let categories = self
            .config
            .categories
            .iter()
            .map(|c| format!("cat:{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");

        match self.config.search_query.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("({categories}) AND ({extra})"),
            _ => format!("({categories})"),
        }
    }

    /// Full request URL for a batch of `limit` records.
    pub fn query_url(&self, limit: usize) -> Result<Url> {
        let url = Url::parse_with_params(
            &self.config.api_url,
            &[
                ("search_query", self.build_query()),
                ("start", "0".to_string()),
                ("max_results", limit.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ],
        )?;
        Ok(url)
    }

    async fn fetch_once(
        &self,
        url: &Url,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<Record>, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = http::error_body(response).await;
            log::debug!("arXiv responded {}: {}", status, body);
            return Err(FetchError::from_status(status));
        }
        let body = response.text().await?;
        parse_feed(&body, limit, since)
    }
}

#[async_trait]
impl RecordSource for ArxivCollector {
    async fn fetch_latest(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let url = self.query_url(limit)?;
        let max_attempts = self.config.max_attempts.max(1);

        match since {
            Some(ts) => log::info!(
                "Fetching up to {} papers published after {} with query: {}",
                limit,
                ts.format("%Y-%m-%d %H:%M"),
                self.build_query()
            ),
            None => log::info!(
                "Fetching up to {} papers with query: {}",
                limit,
                self.build_query()
            ),
        }

        let mut last_error = None;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                log::warn!("Retry attempt {}/{} for arXiv API", attempt + 1, max_attempts);
            }

            match self.fetch_once(&url, limit, since).await {
                Ok(records) => {
                    log::info!(
                        "Fetched {} papers (attempt {}/{})",
                        records.len(),
                        attempt + 1,
                        max_attempts
                    );
                    return Ok(records);
                }
                Err(error) => match error.retry_delay(attempt, &self.config) {
                    Some(delay) => {
                        log::warn!(
                            "{} (attempt {}/{}), waiting {:?}",
                            error,
                            attempt + 1,
                            max_attempts,
                            delay
                        );
                        if attempt + 1 < max_attempts {
                            tokio::time::sleep(delay).await;
                        }
                        last_error = Some(error);
                    }
                    None => {
                        log::error!("arXiv request failed: {}", error);
                        return Err(AppError::source_unavailable(attempt + 1, error));
                    }
                },
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        log::error!("Failed to fetch papers after {} attempts", max_attempts);
        Err(AppError::source_unavailable(max_attempts, message))
    }
}

// --- Atom feed ---

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    published: String,
    title: String,
    summary: String,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
    #[serde(rename = "@type", default)]
    media_type: Option<String>,
}

impl Entry {
    fn is_api_error(&self) -> bool {
        self.id.contains("/api/errors")
    }

    fn into_record(self) -> std::result::Result<Record, FetchError> {
        let published_at = DateTime::parse_from_rfc3339(self.published.trim())
            .map_err(|e| {
                FetchError::Malformed(format!("bad published date '{}': {e}", self.published))
            })?
            .with_timezone(&Utc);

        let entry_url = self.id.trim().to_string();
        let id = entry_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FetchError::Malformed(format!("bad entry id '{entry_url}'")))?
            .to_string();

        let url = self
            .links
            .iter()
            .find(|l| {
                l.rel.as_deref() == Some("alternate")
                    && l.media_type.as_deref().is_none_or(|t| t == "text/html")
            })
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry_url.clone());

        let mut categories: Vec<String> = Vec::new();
        for category in self.categories {
            let term = category.term.trim().to_string();
            if !term.is_empty() && !categories.contains(&term) {
                categories.push(term);
            }
        }

        Ok(Record {
            id,
            title: normalize_whitespace(&self.title),
            abstract_text: normalize_whitespace(&self.summary),
            categories,
            published_at,
            url,
        })
    }
}

/// Parse an Atom response into at most `limit` records.
///
/// Entries arrive newest first, so parsing stops at the first entry
/// published at or before `since`.
pub fn parse_feed(
    xml: &str,
    limit: usize,
    since: Option<DateTime<Utc>>,
) -> std::result::Result<Vec<Record>, FetchError> {
    let feed: Feed =
        quick_xml::de::from_str(xml).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let mut records = Vec::new();
    for entry in feed.entries {
        if entry.is_api_error() {
            return Err(FetchError::Malformed(normalize_whitespace(&entry.summary)));
        }

        let record = entry.into_record()?;
        if let Some(since) = since {
            if record.published_at <= since {
                log::info!(
                    "Reached papers older than {}, stopping",
                    since.format("%Y-%m-%d %H:%M")
                );
                break;
            }
        }

        records.push(record);
        if records.len() >= limit {
            break;
        }
    }
    Ok(records)
}
