//! End-to-end runs of the accumulate and deliver pipelines against an
//! in-memory store, with the catalog, model and mail server faked.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arxiv_digest::error::{
    AppError, EXIT_CONFIG, EXIT_DELIVERY, EXIT_EMPTY, EXIT_SOURCE, EXIT_SUCCESS, EXIT_SUMMARY,
    Result,
};
use arxiv_digest::models::{
    Config, PromotionPolicy, Record, RunKind, RunOutcome, RunStatus,
};
use arxiv_digest::pipeline::{self, Pipeline};
use arxiv_digest::services::{
    DeliveryError, LlmClient, MailTransport, Notifier, RecordSource, Summarizer, SummaryError,
};
use arxiv_digest::storage::{RecordStore, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use lettre::Message;

// --- Fakes ---

/// Catalog returning its records newest first.
struct FakeCatalog {
    records: Vec<Record>,
    unavailable: bool,
    requests: Mutex<Vec<(usize, Option<DateTime<Utc>>)>>,
}

impl FakeCatalog {
    fn new(mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Self {
            records,
            unavailable: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl RecordSource for FakeCatalog {
    async fn fetch_latest(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        self.requests.lock().unwrap().push((limit, since));
        if self.unavailable {
            return Err(AppError::source_unavailable(3, "503 Service Unavailable"));
        }
        Ok(self
            .records
            .iter()
            .filter(|r| since.is_none_or(|s| r.published_at > s))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Model failing for every title containing `fail_marker`.
struct FakeModel {
    fail_marker: Option<&'static str>,
}

#[async_trait]
impl LlmClient for FakeModel {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
    ) -> std::result::Result<String, SummaryError> {
        match self.fail_marker {
            Some(marker) if prompt.contains(marker) => Err(SummaryError::RateLimited),
            _ => Ok("Short synopsis.".to_string()),
        }
    }
}

#[derive(Default)]
struct MailLog {
    attempts: usize,
    delivered: usize,
}

/// Mail server failing every send with `failure`, if set.
struct FakeMailServer {
    failure: Option<fn() -> DeliveryError>,
    log: Arc<Mutex<MailLog>>,
}

#[async_trait]
impl MailTransport for FakeMailServer {
    async fn send(&self, _message: Message) -> std::result::Result<(), DeliveryError> {
        let mut log = self.log.lock().unwrap();
        log.attempts += 1;
        match self.failure {
            Some(failure) => Err(failure()),
            None => {
                log.delivered += 1;
                Ok(())
            }
        }
    }
}

// --- Fixtures ---

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// Record `i` is published `i` hours after the base time.
fn paper(i: usize, title: &str) -> Record {
    Record {
        id: format!("2602.{i:05}v1"),
        title: title.to_string(),
        abstract_text: format!("Abstract of paper {i}."),
        categories: vec!["cs.AI".to_string()],
        published_at: base_time() + Duration::hours(i as i64),
        url: format!("http://arxiv.org/abs/2602.{i:05}v1"),
    }
}

fn papers(count: usize) -> Vec<Record> {
    (1..=count).map(|i| paper(i, &format!("Paper {i}"))).collect()
}

fn config() -> Config {
    let mut config = Config::default();
    config.email.from = "bot@example.com".into();
    config.email.to = vec!["reader@example.com".into(), "other@example.com".into()];
    config.email.retry_delay_secs = 0;
    config.summarizer.rate_limit_delay_secs = 0;
    config.summarizer.error_delay_secs = 0;
    config.notifications.enabled = false;
    config
}

struct Harness {
    config: Config,
    store: SqliteStore,
    catalog: FakeCatalog,
    summarizer: Summarizer,
    notifier: Notifier,
    mail: Arc<Mutex<MailLog>>,
}

impl Harness {
    fn new(config: Config, catalog: FakeCatalog) -> Self {
        Self::with_fakes(config, catalog, None, None)
    }

    fn with_fakes(
        config: Config,
        catalog: FakeCatalog,
        fail_marker: Option<&'static str>,
        mail_failure: Option<fn() -> DeliveryError>,
    ) -> Self {
        let mail = Arc::new(Mutex::new(MailLog::default()));
        let summarizer =
            Summarizer::with_client(&config.summarizer, Box::new(FakeModel { fail_marker }));
        let notifier = Notifier::with_transport(
            &config,
            Box::new(FakeMailServer {
                failure: mail_failure,
                log: Arc::clone(&mail),
            }),
        )
        .unwrap();

        Self {
            store: SqliteStore::open_in_memory().unwrap(),
            config,
            catalog,
            summarizer,
            notifier,
            mail,
        }
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(
            &self.config,
            &self.store,
            &self.catalog,
            &self.summarizer,
            &self.notifier,
        )
    }

    fn stage(&self, records: &[Record]) {
        assert_eq!(self.store.insert_if_new(records).unwrap(), records.len());
    }

    fn runs(&self) -> Vec<(RunKind, RunStatus, usize)> {
        self.store
            .recent_runs(100)
            .unwrap()
            .into_iter()
            .map(|r| (r.kind, r.status, r.count))
            .collect()
    }

    fn selected_ids(&self) -> HashSet<String> {
        self.store
            .processed_flags()
            .unwrap()
            .into_iter()
            .filter(|(_, selected)| *selected)
            .map(|(id, _)| id)
            .collect()
    }
}

// --- Accumulate ---

#[tokio::test]
async fn first_accumulate_stores_up_to_fetch_limit() {
    let harness = Harness::new(config(), FakeCatalog::new(papers(40)));

    let outcome = harness.pipeline().accumulate().await.unwrap();

    assert_eq!(outcome, RunOutcome::Success { count: 15 });
    assert_eq!(harness.store.pending_count().unwrap(), 15);
    assert_eq!(
        harness.runs(),
        vec![(RunKind::Accumulate, RunStatus::Success, 15)]
    );
    assert_eq!(*harness.catalog.requests.lock().unwrap(), vec![(15, None)]);
}

#[tokio::test]
async fn accumulate_without_results_is_empty() {
    let harness = Harness::new(config(), FakeCatalog::new(Vec::new()));

    let outcome = harness.pipeline().accumulate().await.unwrap();

    assert_eq!(outcome, RunOutcome::Empty);
    assert_eq!(outcome.exit_code(), EXIT_EMPTY);
    assert_eq!(
        harness.runs(),
        vec![(RunKind::Accumulate, RunStatus::Empty, 0)]
    );
}

#[tokio::test]
async fn accumulate_of_known_records_is_empty() {
    let harness = Harness::new(config(), FakeCatalog::new(papers(5)));
    harness.stage(&papers(5));

    let outcome = harness.pipeline().accumulate().await.unwrap();

    assert_eq!(outcome, RunOutcome::Empty);
    assert_eq!(harness.store.pending_count().unwrap(), 5);
}

#[tokio::test]
async fn accumulate_asks_only_for_records_after_last_success() {
    let harness = Harness::new(config(), FakeCatalog::new(papers(3)));
    harness
        .store
        .append_run(RunKind::Accumulate, 3, RunStatus::Success, None);

    harness.pipeline().accumulate().await.unwrap();

    let requests = harness.catalog.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].1.is_some());
}

#[tokio::test]
async fn unavailable_source_propagates_without_run_entry() {
    let harness = Harness::new(config(), FakeCatalog::unavailable());

    let err = harness.pipeline().accumulate().await.unwrap_err();

    assert_eq!(err.exit_code(), EXIT_SOURCE);
    assert!(harness.runs().is_empty());
}

// --- Deliver ---

#[tokio::test]
async fn deliver_selects_newest_and_clears_pending() {
    let harness = Harness::new(config(), FakeCatalog::new(Vec::new()));
    let batch = papers(90);
    harness.stage(&batch);

    let mut pipeline = harness.pipeline();
    let outcome = pipeline.deliver().await.unwrap();
    assert_eq!(pipeline.stats().selected, Some(15));

    assert_eq!(outcome, RunOutcome::Success { count: 15 });
    assert_eq!(harness.store.pending_count().unwrap(), 0);
    assert_eq!(harness.store.processed_count().unwrap(), 90);

    let newest: HashSet<String> = batch[75..].iter().map(|r| r.id.clone()).collect();
    assert_eq!(harness.selected_ids(), newest);

    assert_eq!(harness.mail.lock().unwrap().delivered, 1);
    assert_eq!(
        harness.runs(),
        vec![(RunKind::Deliver, RunStatus::Success, 15)]
    );
}

#[tokio::test]
async fn deliver_prefers_keyword_matches() {
    let mut config = config();
    config.ranking.keywords = vec!["agents".into()];
    config.ranking.display_limit = 2;
    let harness = Harness::new(config, FakeCatalog::new(Vec::new()));

    let mut batch = papers(10);
    batch.push(paper(11, "Agents Revisited"));
    batch[0].title = "Agents for everyone".into();
    harness.stage(&batch);

    harness.pipeline().deliver().await.unwrap();

    let expected: HashSet<String> = [batch[0].id.clone(), batch[10].id.clone()].into();
    assert_eq!(harness.selected_ids(), expected);
}

#[tokio::test]
async fn deliver_with_nothing_pending_is_empty() {
    let harness = Harness::new(config(), FakeCatalog::new(Vec::new()));

    let outcome = harness.pipeline().deliver().await.unwrap();

    assert_eq!(outcome, RunOutcome::Empty);
    assert_eq!(harness.mail.lock().unwrap().attempts, 0);
    assert_eq!(harness.runs(), vec![(RunKind::Deliver, RunStatus::Empty, 0)]);
}

#[tokio::test]
async fn auth_failure_still_promotes_whole_batch() {
    let harness = Harness::with_fakes(
        config(),
        FakeCatalog::new(Vec::new()),
        None,
        Some(|| DeliveryError::Auth("535 5.7.8 Authentication failed".into())),
    );
    harness.stage(&papers(90));

    let mut pipeline = harness.pipeline();
    let err = pipeline.deliver().await.unwrap_err();
    assert_eq!(pipeline.stats().promoted, Some(90));

    assert!(matches!(err, AppError::DeliveryAuth(_)));
    assert_eq!(err.exit_code(), EXIT_DELIVERY);
    assert_eq!(harness.mail.lock().unwrap().attempts, 1);
    assert_eq!(harness.store.pending_count().unwrap(), 0);
    assert_eq!(harness.store.processed_count().unwrap(), 90);
    assert_eq!(harness.selected_ids().len(), 15);
    assert!(harness.runs().is_empty());
}

#[tokio::test]
async fn on_delivery_policy_keeps_batch_after_failed_send() {
    let mut config = config();
    config.delivery.promotion = PromotionPolicy::OnDelivery;
    let harness = Harness::with_fakes(
        config,
        FakeCatalog::new(Vec::new()),
        None,
        Some(|| DeliveryError::Transient("421 try again later".into())),
    );
    harness.stage(&papers(20));

    let err = harness.pipeline().deliver().await.unwrap_err();

    assert!(matches!(err, AppError::Delivery(_)));
    assert_eq!(harness.mail.lock().unwrap().attempts, 3);
    assert_eq!(harness.store.pending_count().unwrap(), 20);
    assert_eq!(harness.store.processed_count().unwrap(), 0);
}

#[tokio::test]
async fn failed_summary_batch_promotes_nothing() {
    let mut config = config();
    config.ranking.display_limit = 4;
    let harness = Harness::with_fakes(
        config,
        FakeCatalog::new(Vec::new()),
        Some("Doomed"),
        None,
    );
    // The three newest fail, so 3 of 4 selected summaries are unavailable.
    let batch = vec![
        paper(1, "Fine"),
        paper(2, "Doomed A"),
        paper(3, "Doomed B"),
        paper(4, "Doomed C"),
    ];
    harness.stage(&batch);

    let err = harness.pipeline().deliver().await.unwrap_err();

    assert!(matches!(err, AppError::SummaryBatch { failed: 3, total: 4 }));
    assert_eq!(err.exit_code(), EXIT_SUMMARY);
    assert_eq!(harness.store.pending_count().unwrap(), 4);
    assert_eq!(harness.mail.lock().unwrap().attempts, 0);
}

#[tokio::test]
async fn half_failed_summaries_still_deliver() {
    let mut config = config();
    config.ranking.display_limit = 4;
    let harness = Harness::with_fakes(
        config,
        FakeCatalog::new(Vec::new()),
        Some("Doomed"),
        None,
    );
    harness.stage(&[
        paper(1, "Fine A"),
        paper(2, "Fine B"),
        paper(3, "Doomed A"),
        paper(4, "Doomed B"),
    ]);

    let mut pipeline = harness.pipeline();
    let outcome = pipeline.deliver().await.unwrap();

    assert_eq!(outcome, RunOutcome::Success { count: 4 });
    assert_eq!(pipeline.stats().summaries_unavailable, Some(2));
    assert_eq!(harness.mail.lock().unwrap().delivered, 1);
}

#[tokio::test]
async fn required_matches_with_none_found_spends_batch() {
    let mut config = config();
    config.ranking.keywords = vec!["quantum".into()];
    config.ranking.require_keyword_match = true;
    let harness = Harness::new(config, FakeCatalog::new(Vec::new()));
    harness.stage(&papers(8));

    let outcome = harness.pipeline().deliver().await.unwrap();

    assert_eq!(outcome, RunOutcome::Empty);
    assert_eq!(harness.store.pending_count().unwrap(), 0);
    assert_eq!(harness.store.processed_count().unwrap(), 8);
    assert!(harness.selected_ids().is_empty());
    assert_eq!(harness.mail.lock().unwrap().attempts, 0);
    assert_eq!(harness.runs(), vec![(RunKind::Deliver, RunStatus::Empty, 0)]);
}

#[tokio::test]
async fn failed_keyword_ranking_ignores_required_matches() {
    let mut config = config();
    config.ranking.keywords = vec!["agents".into(), " ".into()];
    config.ranking.require_keyword_match = true;
    let harness = Harness::new(config, FakeCatalog::new(Vec::new()));
    let batch: Vec<Record> = (1..=5).map(|i| paper(i, &format!("agents {i}"))).collect();
    harness.stage(&batch);

    let mut pipeline = harness.pipeline();
    let outcome = pipeline.deliver().await.unwrap();

    assert_eq!(outcome, RunOutcome::Success { count: 5 });
    assert_eq!(pipeline.stats().selected, Some(5));
    assert_eq!(harness.selected_ids().len(), 5);
    assert_eq!(harness.mail.lock().unwrap().delivered, 1);
}

#[tokio::test]
async fn accumulate_then_deliver_never_double_stores() {
    let harness = Harness::new(config(), FakeCatalog::new(papers(15)));

    harness.pipeline().accumulate().await.unwrap();
    harness.pipeline().deliver().await.unwrap();

    // Same catalog again: everything is already processed.
    let inserted = harness.store.insert_if_new(&papers(15)).unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(harness.store.pending_count().unwrap(), 0);
    assert_eq!(harness.store.processed_count().unwrap(), 15);
}

// --- Whole invocations ---

fn notifying_config() -> Config {
    let mut config = config();
    config.notifications.enabled = true;
    config
}

#[tokio::test]
async fn successful_run_sends_report() {
    let harness = Harness::new(notifying_config(), FakeCatalog::new(Vec::new()));
    harness.stage(&papers(20));

    let code = harness.pipeline().run(RunKind::Deliver).await;

    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(harness.runs(), vec![(RunKind::Deliver, RunStatus::Success, 15)]);
    // Digest plus run report.
    assert_eq!(harness.mail.lock().unwrap().delivered, 2);
}

#[tokio::test]
async fn empty_run_exits_informational() {
    let harness = Harness::new(notifying_config(), FakeCatalog::new(Vec::new()));

    let code = harness.pipeline().run(RunKind::Accumulate).await;

    assert_eq!(code, EXIT_EMPTY);
    assert_eq!(harness.runs(), vec![(RunKind::Accumulate, RunStatus::Empty, 0)]);
}

#[tokio::test]
async fn failed_run_records_error_once_and_alerts() {
    let mut config = notifying_config();
    config.ranking.display_limit = 4;
    let harness = Harness::with_fakes(
        config,
        FakeCatalog::new(Vec::new()),
        Some("Doomed"),
        None,
    );
    harness.stage(&[
        paper(1, "Fine"),
        paper(2, "Doomed A"),
        paper(3, "Doomed B"),
        paper(4, "Doomed C"),
    ]);

    let code = harness.pipeline().run(RunKind::Deliver).await;

    assert_eq!(code, EXIT_SUMMARY);
    assert_eq!(harness.runs(), vec![(RunKind::Deliver, RunStatus::Error, 0)]);
    let mail = harness.mail.lock().unwrap();
    assert_eq!(mail.attempts, 1);
    assert_eq!(mail.delivered, 1);
}

#[tokio::test]
async fn failed_send_alert_is_attempted_and_swallowed() {
    let harness = Harness::with_fakes(
        notifying_config(),
        FakeCatalog::new(Vec::new()),
        None,
        Some(|| DeliveryError::Auth("535 5.7.8 Authentication failed".into())),
    );
    harness.stage(&papers(90));

    let code = harness.pipeline().run(RunKind::Deliver).await;

    assert_eq!(code, EXIT_DELIVERY);
    assert_eq!(harness.runs(), vec![(RunKind::Deliver, RunStatus::Error, 0)]);
    assert_eq!(harness.store.processed_count().unwrap(), 90);
    // One digest attempt, one alert attempt.
    assert_eq!(harness.mail.lock().unwrap().attempts, 2);
}

#[tokio::test]
async fn unavailable_source_run_exits_with_source_code() {
    let harness = Harness::new(notifying_config(), FakeCatalog::unavailable());

    let code = harness.pipeline().run(RunKind::Accumulate).await;

    assert_eq!(code, EXIT_SOURCE);
    assert_eq!(harness.runs(), vec![(RunKind::Accumulate, RunStatus::Error, 0)]);
    assert_eq!(harness.mail.lock().unwrap().delivered, 1);
}

#[tokio::test]
async fn abort_before_pipeline_records_and_alerts() {
    let harness = Harness::new(notifying_config(), FakeCatalog::new(Vec::new()));
    let error = AppError::validation("missing required configuration: ANTHROPIC_API_KEY");

    let code = pipeline::abort(
        &harness.config,
        Some(&harness.store),
        Some(&harness.notifier),
        RunKind::Accumulate,
        &error,
    )
    .await;

    assert_eq!(code, EXIT_CONFIG);
    assert_eq!(harness.runs(), vec![(RunKind::Accumulate, RunStatus::Error, 0)]);
    assert_eq!(harness.mail.lock().unwrap().delivered, 1);
}

#[tokio::test]
async fn abort_without_store_or_notifier_still_maps_code() {
    let error = AppError::storage("database is locked");

    let code = pipeline::abort(&config(), None, None, RunKind::Deliver, &error).await;

    assert_eq!(code, EXIT_CONFIG);
}
