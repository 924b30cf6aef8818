//! Analyzed-content record operations.

use crate::error::DatabaseError;
use crate::lifecycle::RecordUpdate;
use crate::types::{AnalyzedContent, JobStatus, RecordId, StatusCount};
use crate::{Error, Result};

use super::{AnalyzedContentRow, Database, NewRecord, result_column};

const RECORD_COLUMNS: &str = r#"
    id, source_url, category_code, title, status,
    analysis_attempts, shortened_analysis_attempts, processing_started_at,
    error_message, error_type, result, committee_name,
    analyzed_at, created_at, updated_at
"#;

impl Database {
    /// Insert a new `pending` record
    ///
    /// Fails with [`DatabaseError::ConstraintViolation`] if the source URL is
    /// already present.
    pub async fn insert_record(&self, record: &NewRecord) -> Result<RecordId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO analyzed_content (
                source_url, category_code, title, status,
                analysis_attempts, shortened_analysis_attempts,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&record.source_url)
        .bind(record.category_code)
        .bind(&record.title)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "record with source URL {} already exists",
                    record.source_url
                )))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert record: {}",
                e
            ))),
        })?;

        Ok(RecordId(result.last_insert_rowid()))
    }

    /// Get a record by ID
    pub async fn get_record(&self, id: RecordId) -> Result<Option<AnalyzedContent>> {
        let row = sqlx::query_as::<_, AnalyzedContentRow>(&format!(
            "SELECT {} FROM analyzed_content WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get record: {}",
                e
            )))
        })?;

        row.map(AnalyzedContent::try_from).transpose()
    }

    /// Records waiting for an attempt, oldest first
    ///
    /// Eligible means `pending` or `needs_shortened_retry`.
    pub async fn list_eligible(&self, limit: usize) -> Result<Vec<AnalyzedContent>> {
        let rows = sqlx::query_as::<_, AnalyzedContentRow>(&format!(
            r#"
            SELECT {}
            FROM analyzed_content
            WHERE status IN (?, ?)
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
            RECORD_COLUMNS
        ))
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::NeedsShortenedRetry.as_str())
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list eligible records: {}",
                e
            )))
        })?;

        rows.into_iter().map(AnalyzedContent::try_from).collect()
    }

    /// Leased records whose lease started before `cutoff`, oldest lease first
    pub async fn find_stuck(&self, cutoff: i64, limit: usize) -> Result<Vec<AnalyzedContent>> {
        let rows = sqlx::query_as::<_, AnalyzedContentRow>(&format!(
            r#"
            SELECT {}
            FROM analyzed_content
            WHERE status IN (?, ?)
              AND processing_started_at IS NOT NULL
              AND processing_started_at < ?
            ORDER BY processing_started_at ASC, id ASC
            LIMIT ?
            "#,
            RECORD_COLUMNS
        ))
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::ProcessingShortened.as_str())
        .bind(cutoff)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find stuck records: {}",
                e
            )))
        })?;

        rows.into_iter().map(AnalyzedContent::try_from).collect()
    }

    /// Acquire the lease on `record`
    ///
    /// Succeeds only if the stored status, lease, counters and last write time
    /// still match the snapshot.
    /// Returns `false` when another run claimed the record first.
    pub async fn claim_record(&self, record: &AnalyzedContent, update: &RecordUpdate) -> Result<bool> {
        self.update_if_unchanged(record, update, "claim").await
    }

    /// Reset a stale lease
    ///
    /// Succeeds only if the record still holds the lease observed by the scan.
    /// Returns `false` when the record finished or was reset in the meantime.
    pub async fn reset_stuck(&self, record: &AnalyzedContent, update: &RecordUpdate) -> Result<bool> {
        self.update_if_unchanged(record, update, "reset stuck").await
    }

    /// Write an attempt's final state unconditionally
    pub async fn apply_update(&self, id: RecordId, update: &RecordUpdate) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result_json = result_column(update.result.as_ref())?;

        let result = sqlx::query(
            r#"
            UPDATE analyzed_content SET
                status = ?, analysis_attempts = ?, shortened_analysis_attempts = ?,
                processing_started_at = ?, error_message = ?, error_type = ?,
                result = ?, committee_name = ?, analyzed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(i64::from(update.analysis_attempts))
        .bind(i64::from(update.shortened_analysis_attempts))
        .bind(update.processing_started_at)
        .bind(&update.error_message)
        .bind(update.error_type.as_ref().map(|t| t.as_str()))
        .bind(result_json)
        .bind(&update.committee_name)
        .bind(update.analyzed_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update record: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("record {}", id)));
        }
        Ok(())
    }

    /// Number of records per status, zero counts included
    pub async fn count_by_status(&self) -> Result<Vec<StatusCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM analyzed_content GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count records by status: {}",
                e
            )))
        })?;

        Ok(JobStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map(|(_, count)| *count)
                    .unwrap_or(0),
            })
            .collect())
    }

    async fn update_if_unchanged(
        &self,
        record: &AnalyzedContent,
        update: &RecordUpdate,
        operation: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result_json = result_column(update.result.as_ref())?;

        // `IS` compares NULL leases as equal. The counters and `updated_at`
        // reject a snapshot whose record went through a whole attempt since it
        // was read and came back to the same status.
        let result = sqlx::query(
            r#"
            UPDATE analyzed_content SET
                status = ?, analysis_attempts = ?, shortened_analysis_attempts = ?,
                processing_started_at = ?, error_message = ?, error_type = ?,
                result = ?, committee_name = ?, analyzed_at = ?, updated_at = ?
            WHERE id = ? AND status = ? AND processing_started_at IS ?
              AND analysis_attempts = ? AND shortened_analysis_attempts = ?
              AND updated_at = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(i64::from(update.analysis_attempts))
        .bind(i64::from(update.shortened_analysis_attempts))
        .bind(update.processing_started_at)
        .bind(&update.error_message)
        .bind(update.error_type.as_ref().map(|t| t.as_str()))
        .bind(result_json)
        .bind(&update.committee_name)
        .bind(update.analyzed_at)
        .bind(now)
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.processing_started_at)
        .bind(i64::from(record.analysis_attempts))
        .bind(i64::from(record.shortened_analysis_attempts))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to {} record: {}",
                operation, e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
