//! Error types for gazette-analysis
//!
//! This module provides:
//! - The crate-wide [`Error`] type and [`Result`] alias
//! - [`FetchError`] for content retrieval failures
//! - [`ErrorType`], the closed taxonomy persisted in a record's `error_type` column
//! - HTTP status code mapping and structured API error bodies

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for gazette-analysis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gazette-analysis
///
/// Errors of this type escape a component boundary. Failures that belong to a
/// single record's attempt are converted into stored error payloads instead and
/// never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "analysis.batch_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP client could not be built or used
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate source URL)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Content retrieval errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL could not be parsed
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The URL as given
        url: String,
        /// Parser message
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// The requested URL
        url: String,
    },

    /// Transport-level failure (DNS, connect, reset, body read)
    #[error("network failure fetching {url}: {message}")]
    Network {
        /// The requested URL
        url: String,
        /// Underlying client message
        message: String,
    },

    /// The fetch deadline elapsed
    #[error("fetch of {url} timed out after {timeout_ms}ms")]
    Timeout {
        /// The requested URL
        url: String,
        /// The deadline that elapsed
        timeout_ms: u64,
    },

    /// The fetch was cancelled by shutdown
    #[error("fetch of {url} cancelled")]
    Cancelled {
        /// The requested URL
        url: String,
    },

    /// The body was empty or whitespace-only
    #[error("empty content from {url}")]
    EmptyContent {
        /// The requested URL
        url: String,
    },
}

impl FetchError {
    /// The taxonomy entry a fetch failure is persisted under
    pub fn error_type(&self) -> ErrorType {
        match self {
            FetchError::Timeout { .. } => ErrorType::Timeout,
            FetchError::EmptyContent { .. } => ErrorType::EmptyResponse,
            FetchError::InvalidUrl { .. }
            | FetchError::Status { .. }
            | FetchError::Network { .. }
            | FetchError::Cancelled { .. } => ErrorType::FetchError,
        }
    }
}

/// Closed taxonomy of failure categories stored in `error_type`
///
/// Stored as SCREAMING_SNAKE_CASE text. Values written by other producers that
/// this build does not know are kept verbatim in [`ErrorType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorType {
    /// Content source returned an error status or was unreachable
    FetchError,
    /// Content source returned no usable text
    EmptyResponse,
    /// A deadline elapsed (content fetch or analysis call)
    Timeout,
    /// Transport failure talking to the analysis service
    Network,
    /// Analysis service rejected our credentials
    Auth,
    /// Analysis service quota or rate limit hit
    Quota,
    /// Model output parsed but did not match the expected shape
    Schema,
    /// Model refused or was blocked by safety filters
    Safety,
    /// Model output was not valid JSON
    MalformedOutput,
    /// Catch-all for failures with no more specific category
    PipelineError,
    /// Record's category is excluded from analysis
    SkippedByCategory,
    /// A success status was reached without a result payload
    InconsistentState,
    /// The record's lease expired and the rescuer reset it
    StuckLeaseExpired,
    /// Unrecognized value read from storage
    Other(String),
}

impl ErrorType {
    /// Stored string form
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::FetchError => "FETCH_ERROR",
            ErrorType::EmptyResponse => "EMPTY_RESPONSE",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::Network => "NETWORK_ERROR",
            ErrorType::Auth => "AUTH_ERROR",
            ErrorType::Quota => "QUOTA_EXCEEDED",
            ErrorType::Schema => "SCHEMA_VIOLATION",
            ErrorType::Safety => "SAFETY_BLOCKED",
            ErrorType::MalformedOutput => "MALFORMED_OUTPUT",
            ErrorType::PipelineError => "PIPELINE_ERROR",
            ErrorType::SkippedByCategory => "SKIPPED_BY_CATEGORY",
            ErrorType::InconsistentState => "INCONSISTENT_STATE",
            ErrorType::StuckLeaseExpired => "STUCK_LEASE_EXPIRED",
            ErrorType::Other(s) => s,
        }
    }

    /// Whether the failure is likely to clear up on its own
    ///
    /// Used for diagnostics only; the lifecycle treats every attempt failure alike.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorType::FetchError
                | ErrorType::Timeout
                | ErrorType::Network
                | ErrorType::Quota
                | ErrorType::StuckLeaseExpired
        )
    }
}

impl From<&str> for ErrorType {
    fn from(s: &str) -> Self {
        match s {
            "FETCH_ERROR" => ErrorType::FetchError,
            "EMPTY_RESPONSE" => ErrorType::EmptyResponse,
            "TIMEOUT" => ErrorType::Timeout,
            "NETWORK_ERROR" => ErrorType::Network,
            "AUTH_ERROR" => ErrorType::Auth,
            "QUOTA_EXCEEDED" => ErrorType::Quota,
            "SCHEMA_VIOLATION" => ErrorType::Schema,
            "SAFETY_BLOCKED" => ErrorType::Safety,
            "MALFORMED_OUTPUT" => ErrorType::MalformedOutput,
            "PIPELINE_ERROR" => ErrorType::PipelineError,
            "SKIPPED_BY_CATEGORY" => ErrorType::SkippedByCategory,
            "INCONSISTENT_STATE" => ErrorType::InconsistentState,
            "STUCK_LEASE_EXPIRED" => ErrorType::StuckLeaseExpired,
            other => ErrorType::Other(other.to_string()),
        }
    }
}

impl From<String> for ErrorType {
    fn from(s: String) -> Self {
        ErrorType::from(s.as_str())
    }
}

impl From<ErrorType> for String {
    fn from(t: ErrorType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: record 123"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "database_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::ConstraintViolation(_)) => 409,

            // Persistence unreachable is the catastrophic case a scheduler must see
            Error::Database(_) | Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            Error::Network(_) => 502,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::ConstraintViolation(_)) => "conflict",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_round_trips_known_values() {
        let all = [
            ErrorType::FetchError,
            ErrorType::EmptyResponse,
            ErrorType::Timeout,
            ErrorType::Network,
            ErrorType::Auth,
            ErrorType::Quota,
            ErrorType::Schema,
            ErrorType::Safety,
            ErrorType::MalformedOutput,
            ErrorType::PipelineError,
            ErrorType::SkippedByCategory,
            ErrorType::InconsistentState,
            ErrorType::StuckLeaseExpired,
        ];
        for t in all {
            assert_eq!(ErrorType::from(t.as_str()), t, "{} should parse back", t);
        }
    }

    #[test]
    fn test_error_type_unknown_value_is_preserved() {
        let t = ErrorType::from("LEGACY_GEMINI_ERROR");
        assert_eq!(t, ErrorType::Other("LEGACY_GEMINI_ERROR".to_string()));
        assert_eq!(t.as_str(), "LEGACY_GEMINI_ERROR");
    }

    #[test]
    fn test_error_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&ErrorType::SkippedByCategory).unwrap();
        assert_eq!(json, "\"SKIPPED_BY_CATEGORY\"");

        let back: ErrorType = serde_json::from_str("\"QUOTA_EXCEEDED\"").unwrap();
        assert_eq!(back, ErrorType::Quota);
    }

    #[test]
    fn test_transient_partition() {
        assert!(ErrorType::Network.is_transient());
        assert!(ErrorType::Timeout.is_transient());
        assert!(ErrorType::Quota.is_transient());
        assert!(!ErrorType::Auth.is_transient());
        assert!(!ErrorType::Safety.is_transient());
        assert!(!ErrorType::Schema.is_transient());
        assert!(!ErrorType::MalformedOutput.is_transient());
    }

    #[test]
    fn test_fetch_error_maps_to_taxonomy() {
        let url = "https://example.com/g/1".to_string();
        assert_eq!(
            FetchError::Timeout {
                url: url.clone(),
                timeout_ms: 100
            }
            .error_type(),
            ErrorType::Timeout
        );
        assert_eq!(
            FetchError::EmptyContent { url: url.clone() }.error_type(),
            ErrorType::EmptyResponse
        );
        assert_eq!(
            FetchError::Status { status: 503, url }.error_type(),
            ErrorType::FetchError
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound("record 1".into()).status_code(), 404);
        assert_eq!(
            Error::Database(DatabaseError::ConnectionFailed("gone".into())).status_code(),
            500
        );
        assert_eq!(
            Error::Database(DatabaseError::ConstraintViolation("dup".into())).status_code(),
            409
        );
        assert_eq!(
            Error::Config {
                message: "bad".into(),
                key: None
            }
            .status_code(),
            400
        );
    }

    #[tokio::test]
    async fn test_http_client_error_is_network_error() {
        let e = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();
        let error = Error::from(e);
        assert_eq!(error.status_code(), 502);
        assert_eq!(error.error_code(), "network_error");
    }

    #[test]
    fn test_api_error_from_config_error_carries_key() {
        let api: ApiError = Error::Config {
            message: "batch_size must be positive".into(),
            key: Some("analysis.batch_size".into()),
        }
        .into();
        assert_eq!(api.error.code, "config_error");
        assert_eq!(
            api.error.details,
            Some(serde_json::json!({ "key": "analysis.batch_size" }))
        );
    }
}
