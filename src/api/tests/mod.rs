use super::*;
use crate::config::RetryConfig;
use crate::db::NewRecord;
use crate::error::ErrorType;
use crate::invoker::{AnalysisInvoker, InvocationFailure};
use crate::types::{AnalysisResult, RecordId};
use crate::{Config, Service};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

mod system;

/// Invoker that always answers the same way
struct StubInvoker {
    failure: Option<InvocationFailure>,
}

#[async_trait]
impl AnalysisInvoker for StubInvoker {
    async fn analyze(
        &self,
        _prompt: &str,
    ) -> std::result::Result<AnalysisResult, InvocationFailure> {
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(AnalysisResult {
                summary_title: "Zoning amendment".into(),
                overall_summary_sentence: "The council adopted the zoning amendment.".into(),
                committee_name: "City Council".into(),
                agenda_items: vec![],
            }),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

struct TestApp {
    service: Service,
    content: MockServer,
    _temp_dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        Self::build(None, None).await
    }

    async fn with_api_key(api_key: &str) -> Self {
        Self::build(Some(api_key.to_string()), None).await
    }

    async fn failing_with(failure: InvocationFailure) -> Self {
        Self::build(None, Some(failure)).await
    }

    async fn build(api_key: Option<String>, failure: Option<InvocationFailure>) -> Self {
        let temp_dir = tempdir().unwrap();
        let content = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Council minutes"))
            .mount(&content)
            .await;

        let mut config = Config::default();
        config.persistence.database_path = temp_dir.path().join("api.db");
        config.analysis.inter_record_delay = Duration::ZERO;
        config.fetch.retry = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        config.api.api_key = api_key;
        config.api.bind_address = "127.0.0.1:0".parse().unwrap();

        let service = Service::with_invoker(config, Arc::new(StubInvoker { failure }))
            .await
            .unwrap();

        Self {
            service,
            content,
            _temp_dir: temp_dir,
        }
    }

    fn router(&self) -> axum::Router {
        create_router(self.service.app_state())
    }

    async fn insert(&self, doc: &str, category_code: Option<i64>) -> RecordId {
        self.service
            .db()
            .insert_record(&NewRecord {
                source_url: format!("{}/{}", self.content.uri(), doc),
                category_code,
                title: None,
            })
            .await
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router().oneshot(request).await.unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns_and_stops() {
    let app = TestApp::new().await;
    let shutdown = CancellationToken::new();

    let api_handle = tokio::spawn(start_api_server(app.service.app_state(), shutdown.clone()));

    // Give it a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), api_handle)
        .await
        .expect("server should stop after cancellation")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let app = TestApp::with_api_key("s3cret").await;

    let response = app.send(get("/stats")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/stats")
        .header("X-Api-Key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failing_invoker_still_answers_200() {
    let app = TestApp::failing_with(InvocationFailure::new(ErrorType::Quota, "quota exhausted"))
        .await;
    app.insert("doc/1", None).await;

    let response = app.send(post("/jobs/analyze")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let summary: crate::types::RunSummary = json_body(response).await;
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.retry_scheduled, 1);
    assert_eq!(summary.completed, 0);
}
