//! Batch analysis runs
//!
//! One call to [`Analyzer::run_batch`] selects a bounded batch of eligible
//! records and processes them strictly one after another:
//!
//! 1. Skip check: excluded categories go straight to `skipped`
//! 2. Claim: conditional lease acquisition; losing the race skips the record
//! 3. Fetch and prepare the content for the attempt tier
//! 4. Invoke the analysis service with the tier's prompt
//! 5. Compute the transition and persist it
//!
//! Failures inside an attempt, panics included, end that record's attempt and
//! never abort the batch.

use crate::config::AnalysisConfig;
use crate::db::Database;
use crate::error::FetchError;
use crate::fetcher::ContentFetcher;
use crate::invoker::AnalysisInvoker;
use crate::lifecycle::{self, AttemptOutcome, FailureDetail, Thresholds};
use crate::prompt::PromptBuilder;
use crate::types::{AnalyzedContent, AttemptKind, Event, JobStatus, RunSummary};
use crate::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Runs analysis batches over eligible records
pub struct Analyzer {
    db: Arc<Database>,
    fetcher: ContentFetcher,
    invoker: Arc<dyn AnalysisInvoker>,
    prompts: PromptBuilder,
    config: AnalysisConfig,
    thresholds: Thresholds,
    event_tx: broadcast::Sender<Event>,
}

impl Analyzer {
    /// Create an analyzer
    pub fn new(
        db: Arc<Database>,
        fetcher: ContentFetcher,
        invoker: Arc<dyn AnalysisInvoker>,
        config: AnalysisConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let thresholds = Thresholds::from_config(&config);
        Self {
            db,
            fetcher,
            invoker,
            prompts: PromptBuilder::new(),
            config,
            thresholds,
            event_tx,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Process one batch of eligible records
    ///
    /// Fails only if the batch cannot be selected. Per-record failures,
    /// including failed completion writes, are counted in the summary.
    pub async fn run_batch(&self) -> Result<RunSummary> {
        let records = self.db.list_eligible(self.config.batch_size).await?;
        let mut summary = RunSummary {
            selected: records.len(),
            ..RunSummary::default()
        };

        tracing::info!(
            selected = summary.selected,
            invoker = self.invoker.name(),
            "Starting analysis run"
        );

        let cancel = self.fetcher.cancellation();
        for (index, record) in records.into_iter().enumerate() {
            if index > 0 && !self.config.inter_record_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.inter_record_delay) => {}
                }
            }
            // Records not yet claimed stay eligible for the next run
            if cancel.is_cancelled() {
                tracing::info!(
                    remaining = summary.selected - index,
                    "Shutdown requested, stopping analysis run"
                );
                break;
            }
            self.process_record(record, &mut summary).await;
        }

        tracing::info!(
            selected = summary.selected,
            completed = summary.completed,
            partially_completed = summary.partially_completed,
            retry_scheduled = summary.retry_scheduled,
            failed = summary.failed,
            skipped = summary.skipped,
            lost_claims = summary.lost_claims,
            write_errors = summary.write_errors,
            released = summary.released,
            "Analysis run finished"
        );
        self.emit_event(Event::RunFinished {
            summary: summary.clone(),
        });

        Ok(summary)
    }

    async fn process_record(&self, record: AnalyzedContent, summary: &mut RunSummary) {
        let record_id = record.id;

        if lifecycle::is_excluded(&record, &self.config.excluded_categories) {
            let update = lifecycle::skip_update(&record, now());
            match self.db.claim_record(&record, &update).await {
                Ok(true) => {
                    tracing::info!(record_id = %record_id, category = ?record.category_code, "Record skipped by category");
                    summary.skipped += 1;
                    self.emit_event(Event::Skipped { id: record_id });
                }
                Ok(false) => summary.lost_claims += 1,
                Err(e) => {
                    tracing::error!(record_id = %record_id, error = %e, "Failed to write skip");
                    summary.write_errors += 1;
                }
            }
            return;
        }

        let Some(kind) = lifecycle::plan_attempt(record.status) else {
            tracing::debug!(record_id = %record_id, status = %record.status, "Record not eligible");
            return;
        };

        let claim = lifecycle::claim_update(&record, kind, now());
        match self.db.claim_record(&record, &claim).await {
            Ok(true) => {
                tracing::debug!(record_id = %record_id, kind = %kind, "Lease acquired");
            }
            Ok(false) => {
                tracing::info!(record_id = %record_id, "Record claimed by another run");
                summary.lost_claims += 1;
                return;
            }
            Err(e) => {
                tracing::error!(record_id = %record_id, error = %e, "Failed to claim record");
                summary.write_errors += 1;
                return;
            }
        }
        self.emit_event(Event::AttemptStarted {
            id: record_id,
            kind,
        });

        let outcome = AssertUnwindSafe(self.attempt(kind, &record))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!(record_id = %record_id, kind = %kind, panic = %message, "Attempt panicked");
                AttemptOutcome::Failed(Some(FailureDetail::pipeline(message)))
            });

        let abandoned = outcome == AttemptOutcome::Abandoned;

        // Completion always runs, even after a panic; a failed write is only logged
        let update = lifecycle::finish_update(&record, kind, outcome, self.thresholds, now());
        if let Err(e) = self.db.apply_update(record_id, &update).await {
            tracing::error!(record_id = %record_id, error = %e, "Failed to persist attempt result");
            summary.write_errors += 1;
            return;
        }

        tracing::info!(
            record_id = %record_id,
            kind = %kind,
            status = %update.status,
            analysis_attempts = update.analysis_attempts,
            shortened_analysis_attempts = update.shortened_analysis_attempts,
            error_type = ?update.error_type,
            "Attempt finished, lease released"
        );

        match update.status {
            _ if abandoned => summary.released += 1,
            JobStatus::Completed => summary.completed += 1,
            JobStatus::PartiallyCompleted => summary.partially_completed += 1,
            JobStatus::Pending | JobStatus::NeedsShortenedRetry => summary.retry_scheduled += 1,
            _ => summary.failed += 1,
        }

        self.emit_event(Event::AttemptFinished {
            id: record_id,
            kind,
            status: update.status,
            error_type: update.error_type,
        });
    }

    async fn attempt(&self, kind: AttemptKind, record: &AnalyzedContent) -> AttemptOutcome {
        let max_len = match kind {
            AttemptKind::Regular => self.fetcher.max_content_length(),
            AttemptKind::Shortened => self.fetcher.shortened_max_content_length(),
        };
        let tag = format!("record {} {}", record.id, kind);

        let content = match self
            .fetcher
            .fetch_and_prepare(&record.source_url, max_len, &tag)
            .await
        {
            Ok(content) => content,
            Err(FetchError::Cancelled { .. }) => {
                tracing::info!(record_id = %record.id, kind = %kind, "Attempt interrupted by shutdown, releasing lease");
                return AttemptOutcome::Abandoned;
            }
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Content fetch failed");
                return AttemptOutcome::Failed(Some(FailureDetail::from(&e)));
            }
        };

        let prompt = self.prompts.build(kind, record, &content);
        match self.invoker.analyze(&prompt).await {
            Ok(analysis) => AttemptOutcome::Succeeded(analysis),
            Err(failure) => {
                tracing::warn!(
                    record_id = %record.id,
                    error_type = %failure.kind,
                    transient = failure.is_transient(),
                    error = %failure.message,
                    "Analysis failed"
                );
                AttemptOutcome::Failed(Some(failure.into()))
            }
        }
    }

    fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("attempt panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("attempt panicked: {}", s)
    } else {
        "attempt panicked".to_string()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
