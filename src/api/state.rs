//! Application state for the API server

use crate::Config;
use crate::analyzer::Analyzer;
use crate::db::Database;
use crate::rescuer::StuckJobRescuer;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub struct AppState {
    /// Record store
    pub db: Arc<Database>,

    /// Batch runner behind `POST /jobs/analyze`
    pub analyzer: Arc<Analyzer>,

    /// Scanner behind `POST /jobs/rescue`
    pub rescuer: Arc<StuckJobRescuer>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(
        db: Arc<Database>,
        analyzer: Arc<Analyzer>,
        rescuer: Arc<StuckJobRescuer>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            analyzer,
            rescuer,
            config,
        }
    }
}
