//! Application configuration structures.
//!
//! The configuration is read once at startup from a TOML file, overlaid with
//! environment variables, validated, and then passed by reference to every
//! component. Nothing reads the environment after that point.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Catalog query and HTTP behavior
    #[serde(default)]
    pub source: SourceConfig,

    /// Ranking and selection
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Language model settings
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Digest email delivery
    #[serde(default)]
    pub email: EmailConfig,

    /// Admin alerts and run reports
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Local database location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Delivery cycle policy
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset. Numeric variables that fail to
    /// parse are configuration errors.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.summarizer.api_key = v;
        }
        if let Some(v) = get("CLAUDE_MODEL") {
            self.summarizer.model = v;
        }
        if let Some(v) = get("SUMMARY_MAX_TOKENS") {
            self.summarizer.max_tokens = parse_number("SUMMARY_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("ARXIV_CATEGORIES") {
            self.source.categories = split_list(&v);
        }
        if let Some(v) = get("ARXIV_SEARCH_QUERY") {
            self.source.search_query = Some(v);
        }
        if let Some(v) = get("ARXIV_DAILY_FETCH_LIMIT") {
            self.source.fetch_limit = parse_number("ARXIV_DAILY_FETCH_LIMIT", &v)?;
        }
        if let Some(v) = get("ARXIV_DISPLAY_LIMIT") {
            self.ranking.display_limit = parse_number("ARXIV_DISPLAY_LIMIT", &v)?;
        }
        if let Some(v) = get("INTEREST_KEYWORDS") {
            self.ranking.keywords = split_list(&v);
        }
        if let Some(v) = get("SMTP_HOST") {
            self.email.smtp_host = v;
        }
        if let Some(v) = get("SMTP_PORT") {
            self.email.smtp_port = parse_number("SMTP_PORT", &v)?;
        }
        if let Some(v) = get("SMTP_USERNAME") {
            self.email.smtp_username = v;
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            self.email.smtp_password = v;
        }
        if let Some(v) = get("EMAIL_FROM") {
            self.email.from = v;
        }
        if let Some(v) = get("EMAIL_TO") {
            self.email.to = split_list(&v);
        }
        if let Some(v) = get("EMAIL_SUBJECT_PREFIX") {
            self.email.subject_prefix = v;
        }
        if let Some(v) = get("NOTIFICATION_EMAIL_TO") {
            self.notifications.to = Some(v);
        }
        if let Some(v) = get("NOTIFICATION_EMAIL_PREFIX") {
            self.notifications.subject_prefix = v;
        }
        if let Some(v) = get("NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.summarizer.api_key.trim().is_empty() {
            missing.push("ANTHROPIC_API_KEY");
        }
        if self.email.smtp_host.trim().is_empty() {
            missing.push("SMTP_HOST");
        }
        if self.email.smtp_username.trim().is_empty() {
            missing.push("SMTP_USERNAME");
        }
        if self.email.smtp_password.is_empty() {
            missing.push("SMTP_PASSWORD");
        }
        if self.email.from.trim().is_empty() {
            missing.push("EMAIL_FROM");
        }
        if self.email.to.is_empty() {
            missing.push("EMAIL_TO");
        }
        if !missing.is_empty() {
            return Err(AppError::validation(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if !is_valid_email(&self.email.from) {
            return Err(AppError::validation(format!(
                "invalid sender address: {}",
                self.email.from
            )));
        }
        for address in &self.email.to {
            if !is_valid_email(address) {
                return Err(AppError::validation(format!(
                    "invalid digest address: {address}"
                )));
            }
        }
        if let Some(address) = &self.notifications.to {
            if !is_valid_email(address) {
                return Err(AppError::validation(format!(
                    "invalid notification address: {address}"
                )));
            }
        }

        if self.source.categories.is_empty() {
            return Err(AppError::validation("source.categories is empty"));
        }
        if self.source.fetch_limit == 0 {
            return Err(AppError::validation("source.fetch_limit must be > 0"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.source.max_attempts == 0 {
            return Err(AppError::validation("source.max_attempts must be > 0"));
        }
        if self.ranking.display_limit == 0 {
            return Err(AppError::validation("ranking.display_limit must be > 0"));
        }
        if let Some(index) = self.ranking.keywords.iter().position(|k| k.trim().is_empty()) {
            return Err(AppError::validation(format!(
                "ranking.keywords[{index}] is blank"
            )));
        }
        if self.summarizer.max_tokens == 0 {
            return Err(AppError::validation("summarizer.max_tokens must be > 0"));
        }
        if self.summarizer.max_attempts == 0 {
            return Err(AppError::validation("summarizer.max_attempts must be > 0"));
        }
        if self.email.max_attempts == 0 {
            return Err(AppError::validation("email.max_attempts must be > 0"));
        }
        Ok(())
    }

    /// Address receiving alerts and run reports.
    ///
    /// Falls back to the first digest recipient.
    pub fn admin_recipient(&self) -> Option<&str> {
        self.notifications
            .to
            .as_deref()
            .or_else(|| self.email.to.first().map(String::as_str))
    }

    /// Full path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }

    /// Full path of the application log file.
    pub fn log_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.logging.file)
    }
}

/// Split a comma-separated list, trimming items and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Basic shape check for an email address.
pub fn is_valid_email(address: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(address))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AppError::config(format!("{name} is not a valid number: '{value}'")))
}

/// Catalog query and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// arXiv categories, OR-combined in the query
    #[serde(default = "defaults::categories")]
    pub categories: Vec<String>,

    /// Extra query AND-combined with the categories
    #[serde(default)]
    pub search_query: Option<String>,

    /// Maximum records per accumulate run
    #[serde(default = "defaults::fetch_limit")]
    pub fetch_limit: usize,

    /// Query endpoint
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::source_timeout")]
    pub timeout_secs: u64,

    /// Attempts before giving up
    #[serde(default = "defaults::attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff on rate limiting
    #[serde(default = "defaults::rate_limit_base")]
    pub rate_limit_base_secs: u64,

    /// Fixed delay after a 5xx response
    #[serde(default = "defaults::server_error_delay")]
    pub server_error_delay_secs: u64,

    /// Fixed delay after a connection failure or timeout
    #[serde(default = "defaults::network_error_delay")]
    pub network_error_delay_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            categories: defaults::categories(),
            search_query: None,
            fetch_limit: defaults::fetch_limit(),
            api_url: defaults::api_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::source_timeout(),
            max_attempts: defaults::attempts(),
            rate_limit_base_secs: defaults::rate_limit_base(),
            server_error_delay_secs: defaults::server_error_delay(),
            network_error_delay_secs: defaults::network_error_delay(),
        }
    }
}

/// Ranking and selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Interest keywords; empty means newest-first ordering
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Number of records summarized and delivered per cycle
    #[serde(default = "defaults::display_limit")]
    pub display_limit: usize,

    /// Leave records without any keyword match out of the selection
    #[serde(default)]
    pub require_keyword_match: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            display_limit: defaults::display_limit(),
            require_keyword_match: false,
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Anthropic API key
    #[serde(default)]
    pub api_key: String,

    /// Model name
    #[serde(default = "defaults::model")]
    pub model: String,

    /// Token budget per summary
    #[serde(default = "defaults::max_tokens")]
    pub max_tokens: u32,

    /// Messages endpoint
    #[serde(default = "defaults::llm_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::llm_timeout")]
    pub timeout_secs: u64,

    /// Attempts per record
    #[serde(default = "defaults::attempts")]
    pub max_attempts: u32,

    /// Wait unit on rate limiting, multiplied by the attempt number
    #[serde(default = "defaults::llm_rate_limit_delay")]
    pub rate_limit_delay_secs: u64,

    /// Wait after any other API error
    #[serde(default = "defaults::llm_error_delay")]
    pub error_delay_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::model(),
            max_tokens: defaults::max_tokens(),
            endpoint: defaults::llm_endpoint(),
            timeout_secs: defaults::llm_timeout(),
            max_attempts: defaults::attempts(),
            rate_limit_delay_secs: defaults::llm_rate_limit_delay(),
            error_delay_secs: defaults::llm_error_delay(),
        }
    }
}

/// SMTP and digest message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_username: String,

    #[serde(default)]
    pub smtp_password: String,

    /// STARTTLS on non-465 ports; port 465 always uses implicit TLS
    #[serde(default = "defaults::enabled")]
    pub tls: bool,

    /// Sender address
    #[serde(default)]
    pub from: String,

    /// Digest recipients
    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default = "defaults::digest_prefix")]
    pub subject_prefix: String,

    /// SMTP timeout in seconds
    #[serde(default = "defaults::smtp_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "defaults::smtp_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: defaults::smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            tls: true,
            from: String::new(),
            to: Vec::new(),
            subject_prefix: defaults::digest_prefix(),
            timeout_secs: defaults::smtp_timeout(),
            max_attempts: defaults::attempts(),
            retry_delay_secs: defaults::smtp_retry_delay(),
        }
    }
}

/// Admin notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Admin address; defaults to the first digest recipient
    #[serde(default)]
    pub to: Option<String>,

    #[serde(default = "defaults::notification_prefix")]
    pub subject_prefix: String,

    /// Log lines attached to alerts
    #[serde(default = "defaults::log_tail")]
    pub log_tail_lines: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            to: None,
            subject_prefix: defaults::notification_prefix(),
            log_tail_lines: defaults::log_tail(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "defaults::database_file")]
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            database_file: defaults::database_file(),
        }
    }
}

/// When loaded records move from `pending` to `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// Promote the whole batch once a selection is summarized, even if the
    /// digest could not be sent.
    #[default]
    Always,
    /// Promote only after the digest was delivered; a failed send leaves the
    /// batch pending for the next cycle.
    OnDelivery,
}

/// Delivery cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub promotion: PromotionPolicy,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Log file, relative to the data directory
    #[serde(default = "defaults::log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file: defaults::log_file(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Source defaults
    pub fn categories() -> Vec<String> {
        vec!["cs.AI".into(), "cs.CL".into(), "cs.LG".into()]
    }
    pub fn fetch_limit() -> usize {
        15
    }
    pub fn api_url() -> String {
        "https://export.arxiv.org/api/query".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; arxiv-digest/0.1)".into()
    }
    pub fn source_timeout() -> u64 {
        60
    }
    pub fn attempts() -> u32 {
        3
    }
    pub fn rate_limit_base() -> u64 {
        1
    }
    pub fn server_error_delay() -> u64 {
        5
    }
    pub fn network_error_delay() -> u64 {
        10
    }

    // Ranking defaults
    pub fn display_limit() -> usize {
        15
    }

    // Summarizer defaults
    pub fn model() -> String {
        "claude-sonnet-4-5-20250929".into()
    }
    pub fn max_tokens() -> u32 {
        150
    }
    pub fn llm_endpoint() -> String {
        "https://api.anthropic.com/v1/messages".into()
    }
    pub fn llm_timeout() -> u64 {
        60
    }
    pub fn llm_rate_limit_delay() -> u64 {
        60
    }
    pub fn llm_error_delay() -> u64 {
        5
    }

    // Email defaults
    pub fn smtp_port() -> u16 {
        587
    }
    pub fn smtp_timeout() -> u64 {
        30
    }
    pub fn smtp_retry_delay() -> u64 {
        10
    }
    pub fn digest_prefix() -> String {
        "[arXiv Digest]".into()
    }

    // Notification defaults
    pub fn enabled() -> bool {
        true
    }
    pub fn notification_prefix() -> String {
        "[arXiv Bot]".into()
    }
    pub fn log_tail() -> usize {
        50
    }

    // Storage defaults
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn database_file() -> String {
        "digest.db".into()
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn log_file() -> PathBuf {
        PathBuf::from("logs/app.log")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn complete_config() -> Config {
        let mut config = Config::default();
        config.summarizer.api_key = "sk-test".into();
        config.email.smtp_host = "smtp.example.com".into();
        config.email.smtp_username = "bot".into();
        config.email.smtp_password = "secret".into();
        config.email.from = "bot@example.com".into();
        config.email.to = vec!["reader@example.com".into()];
        config
    }

    #[test]
    fn default_config_is_missing_secrets() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("ANTHROPIC_API_KEY"), "got: {err}");
        assert!(err.contains("EMAIL_TO"), "got: {err}");
    }

    #[test]
    fn validate_complete_config_ok() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_recipient() {
        let mut config = complete_config();
        config.email.to.push("not-an-address".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_display_limit() {
        let mut config = complete_config();
        config.ranking.display_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_keyword() {
        let mut config = complete_config();
        config.ranking.keywords = vec!["agents".into(), "  ".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ranking.keywords[1]"));
    }

    #[test]
    fn overrides_split_lists_and_parse_numbers() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EMAIL_TO", "a@example.com, b@example.com,, "),
            ("INTEREST_KEYWORDS", "LLM, agents"),
            ("ARXIV_DISPLAY_LIMIT", "20"),
            ("NOTIFICATIONS_ENABLED", "False"),
            ("ARXIV_SEARCH_QUERY", "   "),
        ]);
        let mut config = Config::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.email.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(config.ranking.keywords, vec!["LLM", "agents"]);
        assert_eq!(config.ranking.display_limit, 20);
        assert!(!config.notifications.enabled);
        assert!(config.source.search_query.is_none());
    }

    #[test]
    fn overrides_reject_non_numeric_limits() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "ARXIV_DAILY_FETCH_LIMIT").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn admin_recipient_falls_back_to_first_reader() {
        let mut config = complete_config();
        assert_eq!(config.admin_recipient(), Some("reader@example.com"));
        config.notifications.to = Some("ops@example.com".into());
        assert_eq!(config.admin_recipient(), Some("ops@example.com"));
    }

    #[test]
    fn toml_sections_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ranking]
            keywords = ["retrieval"]

            [delivery]
            promotion = "on_delivery"
            "#,
        )
        .unwrap();
        assert_eq!(config.ranking.keywords, vec!["retrieval"]);
        assert_eq!(config.ranking.display_limit, 15);
        assert_eq!(config.delivery.promotion, PromotionPolicy::OnDelivery);
        assert_eq!(config.source.fetch_limit, 15);
        assert_eq!(config.database_path(), PathBuf::from("data/digest.db"));
    }
}
