//! Background tasks driving scheduled analysis runs and rescue scans
//!
//! Each task runs one pass, then sleeps for its interval, until its
//! [`CancellationToken`] is triggered. A pass that fails (persistence
//! unreachable) is logged and retried on the next tick.
//!
//! # Example
//!
//! ```no_run
//! use gazette_analysis::scheduler_task::AnalysisTask;
//! use gazette_analysis::analyzer::Analyzer;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn example(analyzer: Arc<Analyzer>) {
//! let cancel = CancellationToken::new();
//! let task = AnalysisTask::new(analyzer, Duration::from_secs(300), cancel.clone());
//!
//! tokio::spawn(async move {
//!     task.run().await;
//! });
//!
//! // Later: stop the loop
//! cancel.cancel();
//! # }
//! ```

use crate::analyzer::Analyzer;
use crate::rescuer::StuckJobRescuer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodically runs [`Analyzer::run_batch`]
pub struct AnalysisTask {
    analyzer: Arc<Analyzer>,
    interval: Duration,
    cancel: CancellationToken,
}

impl AnalysisTask {
    /// Creates a new analysis task
    pub fn new(analyzer: Arc<Analyzer>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            analyzer,
            interval,
            cancel,
        }
    }

    /// Runs batches until cancelled
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Analysis task started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.analyzer.run_batch().await {
                error!(error = %e, "Analysis run failed");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Analysis task stopped");
    }
}

/// Periodically runs [`StuckJobRescuer::rescue`]
pub struct RescueTask {
    rescuer: Arc<StuckJobRescuer>,
    interval: Duration,
    cancel: CancellationToken,
}

impl RescueTask {
    /// Creates a new rescue task
    pub fn new(
        rescuer: Arc<StuckJobRescuer>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rescuer,
            interval,
            cancel,
        }
    }

    /// Runs rescue scans until cancelled
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Rescue task started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.rescuer.rescue().await {
                error!(error = %e, "Rescue scan failed");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Rescue task stopped");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RescueConfig;
    use crate::db::{Database, NewRecord};
    use crate::lifecycle::Thresholds;
    use crate::types::{Event, JobStatus};
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_cancelled_task_exits_without_running() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp.path()).await.unwrap());
        let (event_tx, mut events) = broadcast::channel(16);
        let rescuer = Arc::new(StuckJobRescuer::new(
            db,
            RescueConfig::default(),
            Thresholds {
                max_regular: 3,
                max_shortened: 3,
            },
            event_tx,
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let task = RescueTask::new(rescuer, Duration::from_secs(60), cancel);

        tokio::time::timeout(Duration::from_secs(5), task.run())
            .await
            .expect("task should exit promptly when cancelled");
        assert!(events.try_recv().is_err(), "no scan should have run");
    }

    #[tokio::test]
    async fn test_rescue_task_runs_until_cancelled() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp.path()).await.unwrap());

        let id = db
            .insert_record(&NewRecord {
                source_url: "https://gazette.example/doc/1".into(),
                category_code: None,
                title: None,
            })
            .await
            .unwrap();
        sqlx::query(
            "UPDATE analyzed_content SET status = 'processing', processing_started_at = 0 WHERE id = ?",
        )
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();

        let (event_tx, mut events) = broadcast::channel(16);
        let rescuer = Arc::new(StuckJobRescuer::new(
            db.clone(),
            RescueConfig::default(),
            Thresholds {
                max_regular: 3,
                max_shortened: 3,
            },
            event_tx,
        ));

        let cancel = CancellationToken::new();
        let task = RescueTask::new(rescuer, Duration::from_secs(3600), cancel.clone());
        let handle = tokio::spawn(task.run());

        // First pass runs immediately
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            Event::Rescued {
                id,
                status: JobStatus::Pending
            }
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should stop after cancel")
            .unwrap();
    }
}
