//! # gazette-analysis
//!
//! Batch analysis pipeline for published gazette content.
//!
//! Records move through a persisted lifecycle: a regular tier of full-prompt
//! analysis attempts, a shortened tier with a reduced prompt once the regular
//! attempts are spent, and a terminal state. Every in-flight attempt holds a
//! lease (`processing_started_at`), and a rescuer recovers leases abandoned by
//! a crashed run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gazette_analysis::{Config, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = service.analyzer().run_batch().await?;
//!     println!("completed {} of {}", summary.completed, summary.selected);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Analysis batch runner
pub mod analyzer;
/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Content fetching and preparation
pub mod fetcher;
/// Analysis service client
pub mod invoker;
/// Pure lifecycle transitions
pub mod lifecycle;
/// Prompt construction
pub mod prompt;
/// Stuck-lease recovery
pub mod rescuer;
/// Retry logic with exponential backoff
pub mod retry;
/// Periodic analysis and rescue loops
pub mod scheduler_task;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use analyzer::Analyzer;
pub use config::Config;
pub use db::Database;
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, ErrorType, FetchError, Result, ToHttpStatus,
};
pub use invoker::{AnalysisInvoker, HttpAnalysisInvoker, InvocationFailure};
pub use rescuer::StuckJobRescuer;
pub use types::{
    AnalysisResult, AnalyzedContent, AttemptKind, Event, JobStatus, RecordId, RescueSummary,
    RunSummary, StoredResult,
};

use fetcher::ContentFetcher;
use lifecycle::Thresholds;
use scheduler_task::{AnalysisTask, RescueTask};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// How long shutdown waits for background tasks to finish their pass
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The wired-up pipeline: database, analyzer, rescuer and their background tasks
pub struct Service {
    db: Arc<Database>,
    analyzer: Arc<Analyzer>,
    rescuer: Arc<StuckJobRescuer>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Build a service that talks to the configured analysis endpoint
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let invoker = HttpAnalysisInvoker::new(config.invoker.clone())?;
        Self::with_invoker(config, Arc::new(invoker)).await
    }

    /// Build a service around any [`AnalysisInvoker`]
    pub async fn with_invoker(config: Config, invoker: Arc<dyn AnalysisInvoker>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let cancel = CancellationToken::new();
        let fetcher = ContentFetcher::new(config.fetch.clone(), cancel.child_token())?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            invoker = invoker.name(),
            database = %config.persistence.database_path.display(),
            "Service initialized"
        );

        let analyzer = Arc::new(Analyzer::new(
            db.clone(),
            fetcher,
            invoker,
            config.analysis.clone(),
            event_tx.clone(),
        ));
        let rescuer = Arc::new(StuckJobRescuer::new(
            db.clone(),
            config.rescue.clone(),
            Thresholds::from_config(&config.analysis),
            event_tx.clone(),
        ));

        Ok(Self {
            db,
            analyzer,
            rescuer,
            config: Arc::new(config),
            event_tx,
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Record store
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Batch runner
    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// Stuck-lease scanner
    pub fn rescuer(&self) -> &Arc<StuckJobRescuer> {
        &self.rescuer
    }

    /// Active configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Subscribe to lifecycle events from both the analyzer and the rescuer
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token cancelled by [`Service::shutdown`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// State shared by the API route handlers
    pub fn app_state(&self) -> api::AppState {
        api::AppState::new(
            self.db.clone(),
            self.analyzer.clone(),
            self.rescuer.clone(),
            self.config.clone(),
        )
    }

    /// Start the periodic analysis and rescue loops
    ///
    /// Both stop when the service shuts down.
    pub fn spawn_scheduled_tasks(&self) {
        let analysis = AnalysisTask::new(
            self.analyzer.clone(),
            self.config.analysis.run_interval,
            self.cancel.child_token(),
        );
        let rescue = RescueTask::new(
            self.rescuer.clone(),
            self.config.rescue.scan_interval,
            self.cancel.child_token(),
        );

        let handles = [tokio::spawn(analysis.run()), tokio::spawn(rescue.run())];
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
    }

    /// Stop background work and close the database
    ///
    /// Records mid-attempt when the timeout hits keep their lease and are
    /// recovered by the next rescue scan.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.cancel.cancel();

        let handles = match self.tasks.into_inner() {
            Ok(handles) => handles,
            Err(poisoned) => poisoned.into_inner(),
        };
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!("Timeout waiting for background tasks, proceeding with shutdown");
        }

        self.db.pool().close().await;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Run the service until a termination signal arrives, then shut down.
///
/// Starts the scheduled loops when `api.run_scheduled_tasks` is set and serves
/// the trigger API on `api.bind_address`.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use gazette_analysis::{Config, Service, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = Service::new(Config::default()).await?;
///     run_with_shutdown(service).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: Service) -> Result<()> {
    if service.config.api.run_scheduled_tasks {
        service.spawn_scheduled_tasks();
    } else {
        tracing::info!("Scheduled tasks disabled, waiting for API triggers");
    }

    let shutdown = service.shutdown_token();
    let mut server = tokio::spawn(api::start_api_server(
        service.app_state(),
        shutdown.clone(),
    ));

    let finished = tokio::select! {
        _ = wait_for_signal() => None,
        result = &mut server => Some(result),
    };
    let server_result = match finished {
        Some(result) => result,
        None => {
            shutdown.cancel();
            server.await
        }
    };

    let served = match server_result {
        Ok(result) => result,
        Err(e) => Err(Error::ApiServerError(format!("API server task failed: {}", e))),
    };
    if let Err(e) = &served {
        tracing::error!(error = %e, "API server stopped with an error");
    }

    service.shutdown().await?;
    served
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
