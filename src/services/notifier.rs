// src/services/notifier.rs

//! Email delivery for digests, failure alerts and run reports.
//!
//! Messages are rendered with minijinja from templates compiled into the
//! binary and handed to a [`MailTransport`]. The digest is the only message
//! whose failure matters: alerts and reports are best-effort and never
//! propagate an error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{Mailbox, MultiPart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use minijinja::{Environment, context};
use serde::Serialize;
use thiserror::Error;

use crate::error::{AppError, Result, describe_exit_code};
use crate::models::{Config, EmailConfig, NotificationConfig, RunKind, RunOutcome, SummarizedRecord};

/// Most category tags shown on a digest card.
const MAX_CARD_CATEGORIES: usize = 3;

/// SMTP reply codes meaning the credentials were refused.
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

/// Failure of a single send attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("SMTP authentication failed: {0}")]
    Auth(String),

    #[error("SMTP server rejected the message: {0}")]
    Permanent(String),

    #[error("SMTP send failed: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

impl From<DeliveryError> for AppError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Auth(msg) => AppError::DeliveryAuth(msg),
            other => AppError::delivery(other),
        }
    }
}

impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        let code = e.status().map(|c| c.to_string());
        match code.as_deref() {
            Some(c) if AUTH_FAILURE_CODES.contains(&c) => DeliveryError::Auth(e.to_string()),
            _ if e.is_permanent() => DeliveryError::Permanent(e.to_string()),
            _ => DeliveryError::Transient(e.to_string()),
        }
    }
}

/// Sends a fully built message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> std::result::Result<(), DeliveryError>;
}

/// SMTP transport through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the SMTP transport.
    ///
    /// Port 465 uses implicit TLS; other ports use STARTTLS unless TLS is
    /// disabled.
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let host = config.smtp_host.as_str();
        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| AppError::config(format!("SMTP relay {host}: {e}")))?
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| AppError::config(format!("SMTP relay {host}: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let transport = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> std::result::Result<(), DeliveryError> {
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Rendered digest message parts.
#[derive(Debug, Clone)]
pub struct RenderedDigest {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Serialize)]
struct PaperCard<'a> {
    title: &'a str,
    url: &'a str,
    id: &'a str,
    date: String,
    categories: &'a [String],
    matched_keywords: &'a [String],
    summary: String,
    summary_available: bool,
}

impl<'a> PaperCard<'a> {
    fn new(item: &'a SummarizedRecord) -> Self {
        let record = item.record();
        let shown = record.categories.len().min(MAX_CARD_CATEGORIES);
        Self {
            title: &record.title,
            url: &record.url,
            id: &record.id,
            date: record.published_at.format("%b %d, %Y").to_string(),
            categories: &record.categories[..shown],
            matched_keywords: &item.ranked.matched_keywords,
            summary: item.summary.display_text(),
            summary_available: item.summary.is_available(),
        }
    }
}

fn template_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);

    let templates = [
        ("digest.html", include_str!("templates/digest.html")),
        ("digest.txt", include_str!("templates/digest.txt")),
        ("alert.txt", include_str!("templates/alert.txt")),
        ("report.txt", include_str!("templates/report.txt")),
    ];
    for (name, source) in templates {
        env.add_template(name, source)
            .map_err(|e| AppError::Template(format!("{name}: {e}")))?;
    }
    Ok(env)
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| {
            AppError::config(format!("invalid address '{address}': {e}"))
        })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Delivers digests to readers and alerts to the admin address.
pub struct Notifier {
    email: EmailConfig,
    notifications: NotificationConfig,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    admin: Option<Mailbox>,
    env: Environment<'static>,
    transport: Box<dyn MailTransport>,
}

impl Notifier {
    /// Notifier sending through SMTP.
    pub fn new(config: &Config) -> Result<Self> {
        let mailer = SmtpMailer::new(&config.email)?;
        Self::with_transport(config, Box::new(mailer))
    }

    pub fn with_transport(config: &Config, transport: Box<dyn MailTransport>) -> Result<Self> {
        let from = parse_mailbox(&config.email.from)?;
        let recipients = config
            .email
            .to
            .iter()
            .map(|a| parse_mailbox(a))
            .collect::<Result<Vec<_>>>()?;
        let admin = config.admin_recipient().map(parse_mailbox).transpose()?;

        Ok(Self {
            email: config.email.clone(),
            notifications: config.notifications.clone(),
            from,
            recipients,
            admin,
            env: template_env()?,
            transport,
        })
    }

    /// Subject line of a digest.
    pub fn digest_subject(&self, shown: usize, collected: usize, period_label: &str) -> String {
        format!(
            "{} Top {} of {} Papers - Week of {}",
            self.email.subject_prefix, shown, collected, period_label
        )
    }

    /// Render the digest without sending it.
    pub fn render_digest(
        &self,
        records: &[SummarizedRecord],
        collected: usize,
        period_label: &str,
        keywords: &[String],
    ) -> Result<RenderedDigest> {
        let papers: Vec<PaperCard<'_>> = records.iter().map(PaperCard::new).collect();
        let matched_count = records.iter().filter(|r| r.ranked.has_matches()).count();
        let ctx = context! {
            shown => records.len(),
            collected => collected,
            date_range => period_label,
            keywords => keywords,
            matched_count => matched_count,
            papers => papers,
        };

        Ok(RenderedDigest {
            subject: self.digest_subject(records.len(), collected, period_label),
            html: self.render("digest.html", &ctx)?,
            text: self.render("digest.txt", &ctx)?,
        })
    }

    fn render(&self, name: &str, ctx: &minijinja::Value) -> Result<String> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|e| AppError::Template(format!("{name}: {e}")))
    }

    /// Send the digest to every reader in one message.
    ///
    /// Readers are addressed by `Bcc` with the sender as visible recipient.
    /// Transient failures are retried with a fixed delay; authentication
    /// and other permanent rejections fail immediately.
    pub async fn deliver_digest(
        &self,
        records: &[SummarizedRecord],
        collected: usize,
        period_label: &str,
        keywords: &[String],
    ) -> Result<()> {
        let rendered = self.render_digest(records, collected, period_label, keywords)?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(self.from.clone())
            .subject(rendered.subject.clone());
        for recipient in &self.recipients {
            builder = builder.bcc(recipient.clone());
        }
        let message = builder
            .multipart(MultiPart::alternative_plain_html(rendered.text, rendered.html))
            .map_err(AppError::delivery)?;

        log::info!(
            "Sending digest to {} recipient(s) via BCC",
            self.recipients.len()
        );
        self.send_with_retry(message, self.email.max_attempts).await?;
        log::info!("Digest email sent: {}", rendered.subject);
        Ok(())
    }

    async fn send_with_retry(
        &self,
        message: Message,
        max_attempts: u32,
    ) -> std::result::Result<(), DeliveryError> {
        let max_attempts = max_attempts.max(1);
        let delay = Duration::from_secs(self.email.retry_delay_secs);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log::warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt,
                        max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::error!("{} (attempt {}/{})", e, attempt, max_attempts);
                    return Err(e);
                }
            }
        }
    }

    /// Plain-text message to the admin address, sent once.
    async fn send_admin(&self, subject: String, body: String) -> Result<()> {
        let Some(admin) = &self.admin else {
            log::warn!("No admin address configured, skipping '{}'", subject);
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(admin.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(AppError::delivery)?;

        self.send_with_retry(message, 1).await?;
        Ok(())
    }

    /// Report a failed run to the admin address. Never fails.
    pub async fn deliver_alert(
        &self,
        run_kind: RunKind,
        error: &AppError,
        context: &[(&str, String)],
        log_lines: &[String],
    ) {
        if !self.notifications.enabled {
            log::info!("Notifications disabled, skipping error alert");
            return;
        }

        let now = Utc::now();
        let subject = format!(
            "{} ERROR - {} Failed - {}",
            self.notifications.subject_prefix,
            capitalize(run_kind.as_str()),
            now.format("%b %d, %Y")
        );
        let ctx = context! {
            run_kind => run_kind.as_str(),
            timestamp => now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            exit_code => error.exit_code(),
            exit_meaning => describe_exit_code(error.exit_code()),
            error_type => error.kind(),
            error_message => error.to_string(),
            context => context,
            log_lines => log_lines,
        };

        let result = match self.render("alert.txt", &ctx) {
            Ok(body) => self.send_admin(subject, body).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => log::info!("Error alert sent"),
            Err(e) => log::error!("Failed to send error alert: {}", e),
        }
    }

    /// Summarize a completed run for the admin address. Never fails.
    pub async fn deliver_report(
        &self,
        run_kind: RunKind,
        outcome: &RunOutcome,
        stats: &[(&str, String)],
    ) {
        if !self.notifications.enabled {
            log::info!("Notifications disabled, skipping run report");
            return;
        }

        let now = Utc::now();
        let (status, summary) = match (outcome, run_kind) {
            (RunOutcome::Empty, _) => ("EMPTY", "Nothing to process."),
            (RunOutcome::Success { .. }, RunKind::Accumulate) => (
                "SUCCESS",
                "Fetched and stored new papers from arXiv.",
            ),
            (RunOutcome::Success { .. }, RunKind::Deliver) => (
                "SUCCESS",
                "Generated summaries and sent the digest email.",
            ),
        };
        let subject = format!(
            "{} {} - {} Completed - {}",
            self.notifications.subject_prefix,
            status,
            capitalize(run_kind.as_str()),
            now.format("%b %d, %Y")
        );
        let ctx = context! {
            run_kind => run_kind.as_str(),
            status => status,
            summary => summary,
            timestamp => now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            stats => stats,
        };

        let result = match self.render("report.txt", &ctx) {
            Ok(body) => self.send_admin(subject, body).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => log::info!("Run report sent"),
            Err(e) => log::error!("Failed to send run report: {}", e),
        }
    }
}
