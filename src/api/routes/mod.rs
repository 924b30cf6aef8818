//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] - Analysis run and rescue scan triggers
//! - [`records`] - Record lookup and status counts
//! - [`system`] - Health, events, OpenAPI

use crate::types::StatusCount;
use serde::{Deserialize, Serialize};

mod jobs;
mod records;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use jobs::*;
pub use records::*;
pub use system::*;

/// Response for GET /stats
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, utoipa::ToSchema)]
pub struct StatsResponse {
    /// Total number of records
    pub total: i64,
    /// Count per status, every status listed
    pub statuses: Vec<StatusCount>,
}
