//! Job state machine
//!
//! Pure transition functions over a record snapshot. Nothing here touches the
//! database or the network: the analyzer and the rescuer compute a
//! [`RecordUpdate`] here and hand it to persistence.
//!
//! ```text
//! pending ──claim──▶ processing ──ok──▶ completed
//!    ▲                   │
//!    └──── fail, n < R ──┤
//!                        └─ fail, n = R ─▶ needs_shortened_retry ──claim──▶ processing_shortened
//!                                                  ▲                              │  ok ─▶ partially_completed
//!                                                  └──────── fail, m < S ─────────┤
//!                                                                                 └─ fail, m = S ─▶ failed
//! ```

use crate::config::AnalysisConfig;
use crate::error::{ErrorType, FetchError};
use crate::invoker::InvocationFailure;
use crate::types::{
    AnalysisResult, AnalyzedContent, AttemptKind, ErrorPayload, JobStatus, StoredResult,
};

/// Attempt limits per tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    /// Regular attempts before escalating to the shortened tier
    pub max_regular: u32,
    /// Shortened attempts before failing permanently
    pub max_shortened: u32,
}

impl Thresholds {
    /// Limits from the analysis config
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_regular: config.max_regular_attempts,
            max_shortened: config.max_shortened_attempts,
        }
    }
}

/// Attempts made so far per tier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    /// Regular attempts
    pub regular: u32,
    /// Shortened attempts
    pub shortened: u32,
}

impl AttemptCounters {
    /// Counters of a record snapshot
    pub fn of(record: &AnalyzedContent) -> Self {
        Self {
            regular: record.analysis_attempts,
            shortened: record.shortened_analysis_attempts,
        }
    }

    fn bump(self, kind: AttemptKind, thresholds: Thresholds) -> Self {
        match kind {
            AttemptKind::Regular => Self {
                regular: self.regular.saturating_add(1).min(thresholds.max_regular),
                ..self
            },
            AttemptKind::Shortened => Self {
                shortened: self.shortened.saturating_add(1).min(thresholds.max_shortened),
                ..self
            },
        }
    }
}

/// Where a failed attempt of `kind` leads
///
/// Counts one more attempt of `kind` (never past its maximum) and picks the
/// next status: another try of the same tier while attempts remain, then the
/// shortened tier, then `failed`. Shared by live failures and the rescuer.
pub fn next_state_on_failure(
    kind: AttemptKind,
    counters: AttemptCounters,
    thresholds: Thresholds,
) -> (JobStatus, AttemptCounters) {
    let counters = counters.bump(kind, thresholds);

    let status = match kind {
        AttemptKind::Regular if counters.regular < thresholds.max_regular => JobStatus::Pending,
        AttemptKind::Regular | AttemptKind::Shortened
            if counters.shortened < thresholds.max_shortened =>
        {
            JobStatus::NeedsShortenedRetry
        }
        _ => JobStatus::Failed,
    };

    (status, counters)
}

/// Error detail captured from a failed attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureDetail {
    /// Human-readable message
    pub message: String,
    /// Taxonomy entry
    pub error_type: ErrorType,
    /// Raw model output, if any
    pub raw_output: Option<String>,
}

impl FailureDetail {
    /// A failure with no more specific category
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: ErrorType::PipelineError,
            raw_output: None,
        }
    }

    fn payload(&self) -> StoredResult {
        StoredResult::Error(ErrorPayload {
            error: self.message.clone(),
            error_type: self.error_type.clone(),
            raw_output: self.raw_output.clone(),
        })
    }
}

impl From<&FetchError> for FailureDetail {
    fn from(e: &FetchError) -> Self {
        Self {
            message: e.to_string(),
            error_type: e.error_type(),
            raw_output: None,
        }
    }
}

impl From<InvocationFailure> for FailureDetail {
    fn from(f: InvocationFailure) -> Self {
        Self {
            message: f.message,
            error_type: f.kind,
            raw_output: f.raw_output,
        }
    }
}

/// How an attempt ended
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    /// The invoker returned an analysis
    Succeeded(AnalysisResult),
    /// The attempt failed; `None` when no detail was captured
    Failed(Option<FailureDetail>),
    /// Shutdown interrupted the attempt before it could fail or succeed
    Abandoned,
}

/// Every lifecycle field a transition writes
#[derive(Clone, Debug, PartialEq)]
pub struct RecordUpdate {
    /// New status
    pub status: JobStatus,
    /// Regular attempts made
    pub analysis_attempts: u32,
    /// Shortened attempts made
    pub shortened_analysis_attempts: u32,
    /// Lease timestamp
    pub processing_started_at: Option<i64>,
    /// Error message
    pub error_message: Option<String>,
    /// Error category
    pub error_type: Option<ErrorType>,
    /// Result payload
    pub result: Option<StoredResult>,
    /// Committee name
    pub committee_name: Option<String>,
    /// Finish timestamp
    pub analyzed_at: Option<i64>,
}

impl RecordUpdate {
    fn unchanged(record: &AnalyzedContent) -> Self {
        Self {
            status: record.status,
            analysis_attempts: record.analysis_attempts,
            shortened_analysis_attempts: record.shortened_analysis_attempts,
            processing_started_at: record.processing_started_at,
            error_message: record.error_message.clone(),
            error_type: record.error_type.clone(),
            result: record.result.clone(),
            committee_name: record.committee_name.clone(),
            analyzed_at: record.analyzed_at,
        }
    }

    fn with_failure(mut self, detail: &FailureDetail) -> Self {
        self.error_message = Some(detail.message.clone());
        self.error_type = Some(detail.error_type.clone());
        self.result = Some(detail.payload());
        self.committee_name = None;
        self
    }

    /// Enforce the record invariants on a computed update
    ///
    /// A success status without an analysis payload becomes `failed` with
    /// [`ErrorType::InconsistentState`]. The lease is dropped for any status
    /// that does not hold one.
    pub fn validated(mut self) -> Self {
        if !self.status.holds_lease() {
            self.processing_started_at = None;
        }

        let has_analysis = self
            .result
            .as_ref()
            .and_then(StoredResult::analysis)
            .is_some();

        if self.status.is_success() && !has_analysis {
            tracing::error!(status = %self.status, "Success status without analysis payload");
            let detail = FailureDetail {
                message: format!("status {} reached without an analysis result", self.status),
                error_type: ErrorType::InconsistentState,
                raw_output: None,
            };
            self.status = JobStatus::Failed;
            self = self.with_failure(&detail);
        }

        self
    }
}

/// Which attempt a record is eligible for, if any
pub fn plan_attempt(status: JobStatus) -> Option<AttemptKind> {
    match status {
        JobStatus::Pending => Some(AttemptKind::Regular),
        JobStatus::NeedsShortenedRetry => Some(AttemptKind::Shortened),
        _ => None,
    }
}

/// Whether the record's category is excluded from analysis
pub fn is_excluded(record: &AnalyzedContent, excluded_categories: &[i64]) -> bool {
    record
        .category_code
        .is_some_and(|code| excluded_categories.contains(&code))
}

/// Terminal skip: counters untouched, skip marker stored as the result
pub fn skip_update(record: &AnalyzedContent, now: i64) -> RecordUpdate {
    let code = record
        .category_code
        .map(|c| c.to_string())
        .unwrap_or_default();
    let detail = FailureDetail {
        message: format!("category {} is excluded from analysis", code),
        error_type: ErrorType::SkippedByCategory,
        raw_output: None,
    };

    let mut update = RecordUpdate::unchanged(record).with_failure(&detail);
    update.status = JobStatus::Skipped;
    update.processing_started_at = None;
    update.analyzed_at = Some(now);
    update
}

/// The lease-acquiring transition that starts an attempt
///
/// A regular attempt clears the previous error and result. A shortened attempt
/// keeps them so the shortened prompt can refer to the failure.
pub fn claim_update(record: &AnalyzedContent, kind: AttemptKind, now: i64) -> RecordUpdate {
    let mut update = RecordUpdate::unchanged(record);
    update.status = kind.in_flight_status();
    update.processing_started_at = Some(now);

    if kind == AttemptKind::Regular {
        update.error_message = None;
        update.error_type = None;
        update.result = None;
        update.committee_name = None;
    }
    update
}

/// The transition that ends an attempt
///
/// `record` is the snapshot taken before the claim. A failure without detail
/// keeps the snapshot's error fields, or records [`ErrorType::PipelineError`]
/// if the snapshot has none. An abandoned attempt releases the lease and
/// restores the snapshot without counting an attempt.
pub fn finish_update(
    record: &AnalyzedContent,
    kind: AttemptKind,
    outcome: AttemptOutcome,
    thresholds: Thresholds,
    now: i64,
) -> RecordUpdate {
    if outcome == AttemptOutcome::Abandoned {
        let mut update = RecordUpdate::unchanged(record);
        update.status = kind.ready_status();
        update.processing_started_at = None;
        return update.validated();
    }

    let counters = AttemptCounters::of(record);
    let mut update = RecordUpdate::unchanged(record);
    update.processing_started_at = None;
    update.analyzed_at = Some(now);

    match outcome {
        AttemptOutcome::Succeeded(analysis) => {
            let counters = counters.bump(kind, thresholds);
            update.status = kind.success_status();
            update.analysis_attempts = counters.regular;
            update.shortened_analysis_attempts = counters.shortened;
            update.error_message = None;
            update.error_type = None;
            update.committee_name = Some(analysis.committee_name.clone());
            update.result = Some(StoredResult::Analysis(analysis));
        }
        AttemptOutcome::Failed(detail) => {
            let (status, counters) = next_state_on_failure(kind, counters, thresholds);
            update.status = status;
            update.analysis_attempts = counters.regular;
            update.shortened_analysis_attempts = counters.shortened;
            update.committee_name = None;

            match detail {
                Some(detail) => update = update.with_failure(&detail),
                None if record.error_type.is_some() => {}
                None => {
                    update = update.with_failure(&FailureDetail::pipeline(format!(
                        "{} attempt failed without error detail",
                        kind
                    )))
                }
            }
        }
        AttemptOutcome::Abandoned => {}
    }

    update.validated()
}

/// The reset applied to a record whose lease expired
///
/// Counts a failed attempt of the tier implied by the in-flight status. Returns
/// `None` for a record that does not hold a lease.
pub fn rescue_update(
    record: &AnalyzedContent,
    thresholds: Thresholds,
    now: i64,
) -> Option<RecordUpdate> {
    let kind = AttemptKind::from_in_flight(record.status)?;
    let (status, counters) =
        next_state_on_failure(kind, AttemptCounters::of(record), thresholds);

    let lease_age = record
        .processing_started_at
        .map(|started| now.saturating_sub(started))
        .unwrap_or_default();
    let detail = FailureDetail {
        message: format!(
            "{} attempt abandoned; lease expired after {}s",
            kind, lease_age
        ),
        error_type: ErrorType::StuckLeaseExpired,
        raw_output: None,
    };

    let mut update = RecordUpdate::unchanged(record).with_failure(&detail);
    update.status = status;
    update.analysis_attempts = counters.regular;
    update.shortened_analysis_attempts = counters.shortened;
    Some(update.validated())
}
