//! OpenAPI documentation and schema generation
//!
//! The spec is generated at compile time with utoipa and served at
//! `/openapi.json`.

use utoipa::OpenApi;

/// OpenAPI documentation for the gazette-analysis REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "gazette-analysis REST API",
        description = "Trigger gazette analysis runs and stuck-lease rescue scans, and inspect record lifecycle state",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Jobs
        crate::api::routes::run_analysis,
        crate::api::routes::run_rescue,

        // Records
        crate::api::routes::get_record,
        crate::api::routes::get_stats,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::RecordId,
        crate::types::JobStatus,
        crate::types::AttemptKind,
        crate::types::AnalyzedContent,
        crate::types::AnalysisResult,
        crate::types::ErrorPayload,
        crate::types::StoredResult,
        crate::types::RunSummary,
        crate::types::RescueSummary,
        crate::types::StatusCount,
        crate::types::Event,

        // API response types from routes
        crate::api::routes::StatsResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "jobs", description = "Job triggers - Run an analysis batch or a stuck-lease rescue scan"),
        (name = "records", description = "Records - Lifecycle state of analyzed-content records"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon to add API key authentication scheme to OpenAPI spec
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
