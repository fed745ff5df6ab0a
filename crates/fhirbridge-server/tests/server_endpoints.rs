mod common;

use common::start_server;
use serde_json::Value;

#[tokio::test]
async fn server_endpoints_work() {
    let server = start_server(|_| {}).await;
    let client = &server.client;

    // GET /
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "FhirBridge");
    assert_eq!(body["status"], "ok");

    // GET /healthz
    let resp = client.get(server.url("/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Caller-supplied request ids are echoed back
    let resp = client
        .get(server.url("/healthz"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");

    // Both job lists start empty
    for path in ["/export/jobs", "/import/jobs"] {
        let resp = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["jobs"].as_array().unwrap().len(), 0);
    }

    server.stop().await;
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let server = start_server(|_| {}).await;
    let client = &server.client;
    let id = uuid::Uuid::new_v4();

    for path in [
        format!("/export/status/{id}"),
        format!("/import/status/{id}"),
        "/export/status/not-a-uuid".to_string(),
    ] {
        let resp = client.get(server.url(&path)).send().await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
        assert_eq!(resp.headers()["content-type"], "application/fhir+json");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["resourceType"], "OperationOutcome");
        assert_eq!(body["issue"][0]["code"], "not-found");

        let resp = client.delete(server.url(&path)).send().await.unwrap();
        assert_eq!(resp.status(), 404, "DELETE {path}");
    }

    server.stop().await;
}

#[tokio::test]
async fn unknown_export_level_is_rejected() {
    let server = start_server(|_| {}).await;

    let resp = server
        .client
        .post(server.url("/export/ward"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(
        body["issue"][0]["diagnostics"]
            .as_str()
            .unwrap()
            .contains("Unknown export level")
    );

    server.stop().await;
}

#[tokio::test]
async fn routes_answer_without_a_listener() {
    use axum::body::Body;
    use axum::http::Request;
    use fhirbridge_server::{AppConfig, AppState, build_app};
    use tower::ServiceExt;

    let state = AppState::from_config(AppConfig::default()).expect("state");
    let app = build_app(state);

    let resp = app
        .oneshot(Request::get("/scopes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
