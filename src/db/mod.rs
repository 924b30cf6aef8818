//! Database layer for gazette-analysis
//!
//! Handles SQLite persistence for analyzed-content records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Record insertion, eligibility and stale-lease scans, conditional updates

use crate::error::ErrorType;
use crate::types::{AnalyzedContent, JobStatus, RecordId, StoredResult};
use crate::{Error, Result};
use crate::error::DatabaseError;
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod records;

/// New record to be inserted by ingestion
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Where the record's text is fetched from (unique)
    pub source_url: String,
    /// Gazette category
    pub category_code: Option<i64>,
    /// Document title
    pub title: Option<String>,
}

/// Analyzed-content row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct AnalyzedContentRow {
    /// Unique database ID
    pub id: i64,
    /// Source URL
    pub source_url: String,
    /// Gazette category
    pub category_code: Option<i64>,
    /// Document title
    pub title: Option<String>,
    /// Status text (see [`JobStatus::as_str`])
    pub status: String,
    /// Regular attempts made
    pub analysis_attempts: i64,
    /// Shortened attempts made
    pub shortened_analysis_attempts: i64,
    /// Lease timestamp
    pub processing_started_at: Option<i64>,
    /// Last error message
    pub error_message: Option<String>,
    /// Last error category text
    pub error_type: Option<String>,
    /// Result JSON
    pub result: Option<String>,
    /// Committee name
    pub committee_name: Option<String>,
    /// Unix timestamp of the last finished attempt
    pub analyzed_at: Option<i64>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl TryFrom<AnalyzedContentRow> for AnalyzedContent {
    type Error = Error;

    fn try_from(row: AnalyzedContentRow) -> Result<Self> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "record {} has unknown status '{}'",
                row.id, row.status
            )))
        })?;

        // Result JSON written by other producers may not match our shapes
        let result = row.result.map(|raw| {
            serde_json::from_str::<StoredResult>(&raw).unwrap_or_else(|e| {
                tracing::warn!(record_id = row.id, error = %e, "Unreadable result payload, keeping it verbatim");
                StoredResult::Unrecognized(raw)
            })
        });

        Ok(AnalyzedContent {
            id: RecordId(row.id),
            source_url: row.source_url,
            category_code: row.category_code,
            title: row.title,
            status,
            analysis_attempts: counter(row.analysis_attempts),
            shortened_analysis_attempts: counter(row.shortened_analysis_attempts),
            processing_started_at: row.processing_started_at,
            error_message: row.error_message,
            error_type: row.error_type.map(ErrorType::from),
            result,
            committee_name: row.committee_name,
            analyzed_at: row.analyzed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Text written to the `result` column
fn result_column(result: Option<&StoredResult>) -> Result<Option<String>> {
    match result {
        None => Ok(None),
        Some(StoredResult::Unrecognized(raw)) => Ok(Some(raw.clone())),
        Some(payload) => Ok(Some(serde_json::to_string(payload)?)),
    }
}

fn counter(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Database handle for gazette-analysis
pub struct Database {
    pool: SqlitePool,
}
