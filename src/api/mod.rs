//! REST API server module
//!
//! Lets an external scheduler trigger analysis runs and rescue scans, and
//! exposes record status for monitoring.

use crate::Result;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Jobs
/// - `POST /jobs/analyze` - Run one analysis batch
/// - `POST /jobs/rescue` - Run one stuck-lease rescue scan
///
/// ## Records
/// - `GET /records/:id` - Get a record's lifecycle fields
/// - `GET /stats` - Record counts per status
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent events stream
pub fn create_router(state: AppState) -> Router {
    let api_key = state.config.api.api_key.clone();

    let router = Router::new()
        // Jobs
        .route("/jobs/analyze", post(routes::run_analysis))
        .route("/jobs/rescue", post(routes::run_rescue))
        // Records
        .route("/records/:id", get(routes::get_record))
        .route("/stats", get(routes::get_stats))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    // Apply authentication middleware if API key is configured
    let router = if api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            api_key,
            auth::require_api_key,
        ))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http())
}

/// Start the API server on the configured bind address.
///
/// Serves until `shutdown` is cancelled, then finishes in-flight requests
/// and returns.
///
/// # Example
///
/// ```no_run
/// use gazette_analysis::{Config, Service};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = Service::new(Config::default()).await?;
/// let shutdown = CancellationToken::new();
///
/// // Start API server (blocks until shutdown)
/// gazette_analysis::api::start_api_server(service.app_state(), shutdown).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let bind_address: SocketAddr = state.config.api.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting API server"
    );

    let app = create_router(state);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
