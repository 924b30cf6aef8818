//! Recovery of abandoned leases
//!
//! A worker that crashes or hangs leaves its record in `processing` or
//! `processing_shortened` with a lease that never gets released. The rescuer
//! finds leases older than the stuck threshold and books them as a failed
//! attempt of the implied tier, using the same branching as live failures.
//! It never calls the analysis service.

use crate::config::RescueConfig;
use crate::db::Database;
use crate::lifecycle::{self, Thresholds};
use crate::types::{Event, JobStatus, RescueSummary};
use crate::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Resets records whose lease has gone stale
pub struct StuckJobRescuer {
    db: Arc<Database>,
    config: RescueConfig,
    thresholds: Thresholds,
    event_tx: broadcast::Sender<Event>,
}

impl StuckJobRescuer {
    /// Create a rescuer
    pub fn new(
        db: Arc<Database>,
        config: RescueConfig,
        thresholds: Thresholds,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            config,
            thresholds,
            event_tx,
        }
    }

    /// Run one scan at the current time
    pub async fn rescue(&self) -> Result<RescueSummary> {
        self.rescue_once(chrono::Utc::now().timestamp()).await
    }

    /// Run one scan as of `now` (unix seconds)
    ///
    /// Running it twice in a row rescues nothing the second time: every reset
    /// clears the lease, and a record that changed since the scan is left alone.
    pub async fn rescue_once(&self, now: i64) -> Result<RescueSummary> {
        let threshold = i64::try_from(self.config.stuck_threshold.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(threshold);

        let stuck = self.db.find_stuck(cutoff, self.config.batch_size).await?;
        let mut summary = RescueSummary {
            found: stuck.len(),
            ..RescueSummary::default()
        };

        if stuck.is_empty() {
            tracing::debug!(cutoff, "No stuck records");
            return Ok(summary);
        }

        for record in stuck {
            let Some(update) = lifecycle::rescue_update(&record, self.thresholds, now) else {
                continue;
            };

            match self.db.reset_stuck(&record, &update).await {
                Ok(true) => {
                    tracing::warn!(
                        record_id = %record.id,
                        from = %record.status,
                        to = %update.status,
                        lease_started = ?record.processing_started_at,
                        "Reset stuck record"
                    );
                    if update.status == JobStatus::Failed {
                        summary.failed += 1;
                    } else {
                        summary.requeued += 1;
                    }
                    self.event_tx
                        .send(Event::Rescued {
                            id: record.id,
                            status: update.status,
                        })
                        .ok();
                }
                Ok(false) => {
                    tracing::info!(record_id = %record.id, "Stuck record changed before reset, leaving it");
                    summary.skipped_changed += 1;
                }
                Err(e) => {
                    tracing::error!(record_id = %record.id, error = %e, "Failed to reset stuck record");
                    summary.write_errors += 1;
                }
            }
        }

        tracing::info!(
            found = summary.found,
            requeued = summary.requeued,
            failed = summary.failed,
            skipped_changed = summary.skipped_changed,
            write_errors = summary.write_errors,
            "Rescue scan finished"
        );
        self.event_tx
            .send(Event::RescueFinished {
                summary: summary.clone(),
            })
            .ok();

        Ok(summary)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewRecord;
    use crate::error::ErrorType;
    use crate::types::RecordId;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const NOW: i64 = 1_700_000_000;

    async fn setup(thresholds: Thresholds) -> (StuckJobRescuer, Arc<Database>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp.path()).await.unwrap());
        let (event_tx, _) = broadcast::channel(16);
        let rescuer = StuckJobRescuer::new(
            db.clone(),
            RescueConfig {
                stuck_threshold: Duration::from_secs(15 * 60),
                batch_size: 20,
                scan_interval: Duration::from_secs(300),
            },
            thresholds,
            event_tx,
        );
        (rescuer, db, temp)
    }

    async fn leased(
        db: &Database,
        n: u32,
        status: JobStatus,
        regular: i64,
        shortened: i64,
        lease_age_secs: i64,
    ) -> RecordId {
        let id = db
            .insert_record(&NewRecord {
                source_url: format!("https://gazette.example/doc/{}", n),
                category_code: None,
                title: None,
            })
            .await
            .unwrap();
        sqlx::query(
            r#"
            UPDATE analyzed_content
            SET status = ?, analysis_attempts = ?, shortened_analysis_attempts = ?,
                processing_started_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(regular)
        .bind(shortened)
        .bind(NOW - lease_age_secs)
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_exhausted_stuck_record_fails() {
        let (rescuer, db, _temp) = setup(Thresholds {
            max_regular: 3,
            max_shortened: 2,
        })
        .await;
        let id = leased(&db, 1, JobStatus::Processing, 3, 2, 20 * 60).await;

        let summary = rescuer.rescue_once(NOW).await.unwrap();
        assert_eq!(summary.found, 1);
        assert_eq!(summary.failed, 1);

        let record = db.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.processing_started_at, None);
        assert_eq!(record.analysis_attempts, 3);
        assert_eq!(record.shortened_analysis_attempts, 2);
        assert_eq!(record.error_type, Some(ErrorType::StuckLeaseExpired));
    }

    #[tokio::test]
    async fn test_second_scan_finds_nothing() {
        let (rescuer, db, _temp) = setup(Thresholds {
            max_regular: 3,
            max_shortened: 3,
        })
        .await;
        leased(&db, 1, JobStatus::Processing, 0, 0, 30 * 60).await;
        leased(&db, 2, JobStatus::ProcessingShortened, 3, 1, 16 * 60).await;

        let first = rescuer.rescue_once(NOW).await.unwrap();
        assert_eq!(first.found, 2);
        assert_eq!(first.requeued, 2);

        let second = rescuer.rescue_once(NOW).await.unwrap();
        assert_eq!(second, RescueSummary::default());
    }

    #[tokio::test]
    async fn test_fresh_lease_is_left_alone() {
        let (rescuer, db, _temp) = setup(Thresholds {
            max_regular: 3,
            max_shortened: 3,
        })
        .await;
        let id = leased(&db, 1, JobStatus::Processing, 1, 0, 5 * 60).await;

        let summary = rescuer.rescue_once(NOW).await.unwrap();
        assert_eq!(summary.found, 0);

        let record = db.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.processing_started_at, Some(NOW - 5 * 60));
    }

    #[tokio::test]
    async fn test_stuck_shortened_attempt_counts_shortened_tier() {
        let (rescuer, db, _temp) = setup(Thresholds {
            max_regular: 3,
            max_shortened: 3,
        })
        .await;
        let id = leased(&db, 1, JobStatus::ProcessingShortened, 3, 0, 60 * 60).await;

        rescuer.rescue_once(NOW).await.unwrap();

        let record = db.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::NeedsShortenedRetry);
        assert_eq!(record.shortened_analysis_attempts, 1);
        assert_eq!(record.analysis_attempts, 3);
    }

    #[tokio::test]
    async fn test_rescue_emits_events() {
        let (rescuer, db, _temp) = setup(Thresholds {
            max_regular: 3,
            max_shortened: 3,
        })
        .await;
        let mut events = rescuer.event_tx.subscribe();
        let id = leased(&db, 1, JobStatus::Processing, 0, 0, 60 * 60).await;

        rescuer.rescue_once(NOW).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            Event::Rescued {
                id,
                status: JobStatus::Pending
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::RescueFinished { .. }
        ));
    }
}
