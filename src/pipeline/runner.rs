// src/pipeline/runner.rs

//! One invocation from start to exit code.

use crate::error::AppError;
use crate::logging;
use crate::models::{Config, RunKind, RunStatus};
use crate::services::Notifier;
use crate::storage::RecordStore;

use super::Pipeline;

impl Pipeline<'_> {
    /// Execute one run of `kind` and map its result to an exit code.
    ///
    /// Successful and empty runs record themselves and send the run report.
    /// A failed run is recorded here as an error run, and an alert with the
    /// counters reached and the tail of the application log goes out.
    pub async fn run(&mut self, kind: RunKind) -> i32 {
        log::info!("Starting {} run", kind);
        let result = match kind {
            RunKind::Accumulate => self.accumulate().await,
            RunKind::Deliver => self.deliver().await,
        };
        let stats = self.stats.as_pairs();

        match result {
            Ok(outcome) => {
                log::info!("{} run finished: {:?}", kind, outcome);
                self.notifier.deliver_report(kind, &outcome, &stats).await;
                outcome.exit_code()
            }
            Err(e) => {
                log::error!("{} run failed: {}", kind, e);
                self.store
                    .append_run(kind, 0, RunStatus::Error, Some(&e.to_string()));
                let logs = logging::recent_lines(
                    &self.config.log_path(),
                    self.config.notifications.log_tail_lines,
                );
                self.notifier.deliver_alert(kind, &e, &stats, &logs).await;
                e.exit_code()
            }
        }
    }
}

/// Record and report a failure that stopped the invocation before a
/// pipeline could be assembled.
///
/// The error run is written when a store is available, the alert is sent
/// when a notifier is. Both are best effort.
pub async fn abort(
    config: &Config,
    store: Option<&dyn RecordStore>,
    notifier: Option<&Notifier>,
    kind: RunKind,
    error: &AppError,
) -> i32 {
    log::error!("{} run could not start: {}", kind, error);

    match store {
        Some(store) => store.append_run(kind, 0, RunStatus::Error, Some(&error.to_string())),
        None => log::warn!("Store unavailable, {} failure not recorded", kind),
    }

    match notifier {
        Some(notifier) => {
            let logs = logging::recent_lines(
                &config.log_path(),
                config.notifications.log_tail_lines,
            );
            notifier.deliver_alert(kind, error, &[], &logs).await;
        }
        None => log::warn!("No notifier available, skipping error alert"),
    }

    error.exit_code()
}
