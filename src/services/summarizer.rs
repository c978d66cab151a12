// src/services/summarizer.rs

//! Language model summaries for selected records.
//!
//! Each record gets its own request with per-record retries. A record whose
//! summary cannot be produced is marked unavailable and the batch goes on;
//! only when more than half the batch fails does the whole step fail.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;

use crate::error::{AppError, Result};
use crate::models::{Config, RankedRecord, Record, SummarizedRecord, Summary, SummarizerConfig};
use crate::utils::{http, truncate_graphemes};

/// Longest failure reason kept on an unavailable summary.
const REASON_MAX_GRAPHEMES: usize = 120;

/// Failure of a single completion request.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("rate limited by the model API")]
    RateLimited,

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl SummaryError {
    /// Delay before retrying, or `None` when the failure is final.
    ///
    /// `attempt` is zero-based.
    pub fn retry_delay(&self, attempt: u32, config: &SummarizerConfig) -> Option<Duration> {
        match self {
            SummaryError::RateLimited => Some(Duration::from_secs(
                config
                    .rate_limit_delay_secs
                    .saturating_mul(u64::from(attempt) + 1),
            )),
            SummaryError::Api { .. } | SummaryError::Http(_) => {
                Some(Duration::from_secs(config.error_delay_secs))
            }
            SummaryError::Parse(_) => None,
        }
    }
}

impl From<reqwest::Error> for SummaryError {
    fn from(e: reqwest::Error) -> Self {
        SummaryError::Http(e.to_string())
    }
}

/// Text completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32)
    -> std::result::Result<String, SummaryError>;
}

/// Anthropic Messages API client.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl ClaudeClient {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let client = http::create_client("arxiv-digest", config.timeout_secs)?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, SummaryError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        log::debug!("Claude request to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SummaryError::RateLimited);
        }
        if !status.is_success() {
            let body = http::error_body(response).await;
            return Err(SummaryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SummaryError::Parse(e.to_string()))?;
        let text = resp["content"][0]["text"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SummaryError::Parse("missing content[0].text".into()))?;

        Ok(text.to_string())
    }
}

/// Prompt sent for one record.
pub fn build_prompt(record: &Record) -> String {
    format!(
        "You are summarizing an academic paper for busy AI/ML practitioners and technical architects.\n\n\
         Paper title: {}\n\n\
         Abstract: {}\n\n\
         Provide a 2-3 sentence summary that:\n\
         1. Explains the main contribution or finding\n\
         2. Highlights novel techniques or approaches\n\
         3. Notes practical applications or implications for engineers\n\n\
         Keep it concise, accessible, and focused on what makes this paper relevant.",
        record.title, record.abstract_text
    )
}

/// Summarizes delivery batches through an [`LlmClient`].
pub struct Summarizer {
    config: SummarizerConfig,
    client: Box<dyn LlmClient>,
}

impl Summarizer {
    /// Summarizer backed by the Claude API.
    pub fn new(config: &Config) -> Result<Self> {
        let client = ClaudeClient::new(&config.summarizer)?;
        Ok(Self::with_client(&config.summarizer, Box::new(client)))
    }

    pub fn with_client(config: &SummarizerConfig, client: Box<dyn LlmClient>) -> Self {
        Self {
            config: config.clone(),
            client,
        }
    }

    /// Summarize one record, never failing.
    pub async fn summarize_one(&self, record: &Record) -> Summary {
        let prompt = build_prompt(record);
        let max_attempts = self.config.max_attempts.max(1);

        let mut last_error: Option<SummaryError> = None;
        for attempt in 0..max_attempts {
            match self.client.complete(&prompt, self.config.max_tokens).await {
                Ok(text) => return Summary::Generated(text),
                Err(error) => {
                    let delay = error.retry_delay(attempt, &self.config);
                    log::warn!(
                        "Summary for {} failed (attempt {}/{}): {}",
                        record.id,
                        attempt + 1,
                        max_attempts,
                        error
                    );
                    match delay {
                        Some(delay) if attempt + 1 < max_attempts => {
                            log::debug!("Waiting {:?} before retrying {}", delay, record.id);
                            tokio::time::sleep(delay).await;
                            last_error = Some(error);
                        }
                        _ => {
                            last_error = Some(error);
                            break;
                        }
                    }
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        log::error!("Giving up on summary for {}: {}", record.id, reason);
        Summary::Unavailable(truncate_graphemes(&reason, REASON_MAX_GRAPHEMES))
    }

    /// Summarize a selection in order.
    ///
    /// Fails with [`AppError::SummaryBatch`] when strictly more than half of
    /// the records could not be summarized. An empty selection succeeds.
    pub async fn summarize_batch(&self, selected: &[RankedRecord]) -> Result<Vec<SummarizedRecord>> {
        log::info!("Summarizing {} papers", selected.len());

        let mut summarized = Vec::with_capacity(selected.len());
        for (i, ranked) in selected.iter().enumerate() {
            log::info!(
                "Summarizing paper {}/{}: {}",
                i + 1,
                selected.len(),
                truncate_graphemes(&ranked.record.title, 60)
            );
            let summary = self.summarize_one(&ranked.record).await;
            summarized.push(SummarizedRecord {
                ranked: ranked.clone(),
                summary,
            });
        }

        let failed = summarized
            .iter()
            .filter(|s| !s.summary.is_available())
            .count();
        let total = summarized.len();

        if failed * 2 > total {
            log::error!("Summarization failed for {}/{} papers", failed, total);
            return Err(AppError::SummaryBatch { failed, total });
        }
        if failed > 0 {
            log::warn!("{} of {} summaries unavailable", failed, total);
        } else {
            log::info!("Summarized all {} papers", total);
        }
        Ok(summarized)
    }
}
