use super::*;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_openapi_endpoint() {
    let app = TestApp::new().await;

    let response = app.send(get("/openapi.json")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let spec: serde_json::Value = json_body(response).await;
    assert!(spec["paths"]["/jobs/analyze"]["post"].is_object());
    assert!(spec["paths"]["/records/{id}"]["get"].is_object());
}

#[tokio::test]
async fn test_event_stream_content_type() {
    let app = TestApp::new().await;

    let response = app.send(get("/events")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new().await;
    let response = app.send(get("/records")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
