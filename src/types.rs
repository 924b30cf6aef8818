//! Core types for gazette-analysis

use crate::error::ErrorType;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for an analyzed-content record
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RecordId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RecordId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RecordId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Processing status of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a regular attempt
    Pending,
    /// Regular attempt in flight (lease held)
    Processing,
    /// Shortened attempt in flight (lease held)
    ProcessingShortened,
    /// Regular attempts exhausted, waiting for a shortened attempt
    NeedsShortenedRetry,
    /// Analyzed with the shortened prompt
    PartiallyCompleted,
    /// Analyzed with the full prompt
    Completed,
    /// Both tiers exhausted
    Failed,
    /// Category excluded from analysis
    Skipped,
}

impl JobStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::ProcessingShortened,
        JobStatus::NeedsShortenedRetry,
        JobStatus::PartiallyCompleted,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Skipped,
    ];

    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::ProcessingShortened => "processing_shortened",
            JobStatus::NeedsShortenedRetry => "needs_shortened_retry",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Parse the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Whether a lease is held in this status
    pub fn holds_lease(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::ProcessingShortened)
    }

    /// Whether the record carries an analysis result in this status
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::PartiallyCompleted)
    }

    /// Whether no further automatic transition happens from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::PartiallyCompleted
                | JobStatus::Failed
                | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which prompt tier an attempt uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    /// Full prompt, full content
    Regular,
    /// Reduced prompt, truncated content
    Shortened,
}

impl AttemptKind {
    /// Status the record holds while this attempt is in flight
    pub fn in_flight_status(&self) -> JobStatus {
        match self {
            AttemptKind::Regular => JobStatus::Processing,
            AttemptKind::Shortened => JobStatus::ProcessingShortened,
        }
    }

    /// Status a record must be in for this attempt to start
    pub fn ready_status(&self) -> JobStatus {
        match self {
            AttemptKind::Regular => JobStatus::Pending,
            AttemptKind::Shortened => JobStatus::NeedsShortenedRetry,
        }
    }

    /// Status a successful attempt of this kind ends in
    pub fn success_status(&self) -> JobStatus {
        match self {
            AttemptKind::Regular => JobStatus::Completed,
            AttemptKind::Shortened => JobStatus::PartiallyCompleted,
        }
    }

    /// The attempt kind an in-flight status implies, if any
    pub fn from_in_flight(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Processing => Some(AttemptKind::Regular),
            JobStatus::ProcessingShortened => Some(AttemptKind::Shortened),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptKind::Regular => f.write_str("regular"),
            AttemptKind::Shortened => f.write_str("shortened"),
        }
    }
}

/// Structured analysis of one gazette record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResult {
    /// Short title for the record
    pub summary_title: String,
    /// One-sentence summary
    pub overall_summary_sentence: String,
    /// Committee or body the record belongs to
    pub committee_name: String,
    /// Individual agenda items, shape defined by the prompt
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub agenda_items: Vec<serde_json::Value>,
}

/// Error detail stored in `result` when a record is not successfully analyzed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorPayload {
    /// Human-readable message
    pub error: String,
    /// Taxonomy entry
    #[serde(rename = "type")]
    #[schema(value_type = String)]
    pub error_type: ErrorType,
    /// Raw model output, when the failure happened while parsing it
    #[serde(rename = "rawOutput", default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

/// Contents of the `result` column
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum StoredResult {
    /// Successful analysis
    Analysis(AnalysisResult),
    /// Last error detail
    Error(ErrorPayload),
    /// Stored text matching neither shape, kept verbatim so writes preserve it
    #[serde(skip_deserializing)]
    Unrecognized(String),
}

impl StoredResult {
    /// The analysis, if this is a success payload
    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match self {
            StoredResult::Analysis(a) => Some(a),
            StoredResult::Error(_) | StoredResult::Unrecognized(_) => None,
        }
    }
}

/// One analyzed-content record
///
/// Records are created `pending` by ingestion and afterwards mutated only by
/// attempt transitions and the stuck-lease rescuer. They are never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalyzedContent {
    /// Unique database ID
    pub id: RecordId,
    /// Where the record's text is fetched from
    pub source_url: String,
    /// Gazette category, consulted by the skip check
    pub category_code: Option<i64>,
    /// Document title, used as prompt context
    pub title: Option<String>,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Regular attempts made
    pub analysis_attempts: u32,
    /// Shortened attempts made
    pub shortened_analysis_attempts: u32,
    /// Lease timestamp (unix seconds), set while an attempt is in flight
    pub processing_started_at: Option<i64>,
    /// Last error message
    pub error_message: Option<String>,
    /// Last error category
    #[schema(value_type = Option<String>)]
    pub error_type: Option<ErrorType>,
    /// Analysis result or last error detail
    pub result: Option<StoredResult>,
    /// Committee name from a successful analysis
    pub committee_name: Option<String>,
    /// Unix timestamp of the last finished attempt
    pub analyzed_at: Option<i64>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

/// Outcome counts of one analysis run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunSummary {
    /// Records selected for this run
    pub selected: usize,
    /// Records that reached `completed`
    pub completed: usize,
    /// Records that reached `partially_completed`
    pub partially_completed: usize,
    /// Records sent back to `pending` or `needs_shortened_retry`
    pub retry_scheduled: usize,
    /// Records that reached `failed`
    pub failed: usize,
    /// Records skipped by category
    pub skipped: usize,
    /// Records another run claimed first
    pub lost_claims: usize,
    /// Completion writes that did not reach storage
    pub write_errors: usize,
    /// Attempts interrupted by shutdown, released without counting
    #[serde(default)]
    pub released: usize,
}

/// Outcome counts of one rescue scan
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RescueSummary {
    /// Stale leases found
    pub found: usize,
    /// Records reset to a retry status
    pub requeued: usize,
    /// Records moved to `failed`
    pub failed: usize,
    /// Records that changed between scan and reset
    pub skipped_changed: usize,
    /// Resets that did not reach storage
    pub write_errors: usize,
}

/// Number of records in one status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCount {
    /// Status
    pub status: JobStatus,
    /// Record count
    pub count: i64,
}

/// Lifecycle events broadcast to subscribers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A lease was acquired and an attempt started
    AttemptStarted {
        /// Record
        id: RecordId,
        /// Attempt tier
        kind: AttemptKind,
    },
    /// An attempt finished and its transition was computed
    AttemptFinished {
        /// Record
        id: RecordId,
        /// Attempt tier
        kind: AttemptKind,
        /// Status written
        status: JobStatus,
        /// Failure category, when the attempt failed
        #[schema(value_type = Option<String>)]
        error_type: Option<ErrorType>,
    },
    /// A record was skipped by category
    Skipped {
        /// Record
        id: RecordId,
    },
    /// The rescuer reset an abandoned lease
    Rescued {
        /// Record
        id: RecordId,
        /// Status written
        status: JobStatus,
    },
    /// An analysis run finished
    RunFinished {
        /// Outcome counts
        summary: RunSummary,
    },
    /// A rescue scan finished
    RescueFinished {
        /// Outcome counts
        summary: RescueSummary,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_forms() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
        assert_eq!(
            serde_json::to_string(&JobStatus::NeedsShortenedRetry).unwrap(),
            "\"needs_shortened_retry\""
        );
    }

    #[test]
    fn test_status_partitions() {
        let leased: Vec<_> = JobStatus::ALL.iter().filter(|s| s.holds_lease()).collect();
        assert_eq!(
            leased,
            vec![&JobStatus::Processing, &JobStatus::ProcessingShortened]
        );

        let terminal: Vec<_> = JobStatus::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal.len(), 4);
        assert!(JobStatus::ALL.iter().all(|s| !(s.holds_lease() && s.is_terminal())));
    }

    #[test]
    fn test_attempt_kind_status_mapping() {
        assert_eq!(
            AttemptKind::from_in_flight(JobStatus::Processing),
            Some(AttemptKind::Regular)
        );
        assert_eq!(
            AttemptKind::from_in_flight(JobStatus::ProcessingShortened),
            Some(AttemptKind::Shortened)
        );
        assert_eq!(AttemptKind::from_in_flight(JobStatus::Pending), None);
        assert_eq!(
            AttemptKind::Shortened.success_status(),
            JobStatus::PartiallyCompleted
        );
    }

    #[test]
    fn test_stored_result_distinguishes_shapes() {
        let success: StoredResult = serde_json::from_value(serde_json::json!({
            "summary_title": "Budget committee",
            "overall_summary_sentence": "The committee met.",
            "committee_name": "Budget",
            "agenda_items": [{ "title": "Item 1" }]
        }))
        .unwrap();
        assert!(success.analysis().is_some());

        let failure: StoredResult = serde_json::from_value(serde_json::json!({
            "error": "model returned prose",
            "type": "MALFORMED_OUTPUT",
            "rawOutput": "Sure! Here is..."
        }))
        .unwrap();
        match failure {
            StoredResult::Error(payload) => {
                assert_eq!(payload.error_type, ErrorType::MalformedOutput);
                assert_eq!(payload.raw_output.as_deref(), Some("Sure! Here is..."));
            }
            other => panic!("expected error payload, got {:?}", other),
        }
    }

    #[test]
    fn test_error_payload_omits_missing_raw_output() {
        let payload = ErrorPayload {
            error: "skipped".into(),
            error_type: ErrorType::SkippedByCategory,
            raw_output: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "error": "skipped", "type": "SKIPPED_BY_CATEGORY" })
        );
    }
}
