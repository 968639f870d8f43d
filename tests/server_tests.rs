#![cfg(unix)]

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{completes_with, hangs, harness, wait_terminal, LOOPBACK_REPORT};
use scan_orchestrator::server::router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn parse_id(body: &Value) -> Uuid {
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn start_poll_and_fetch_results() {
    let h = harness(&completes_with(LOOPBACK_REPORT), |_| {});
    let app = router(h.engine.clone());

    let (status, body) = call(
        &app,
        "POST",
        "/api/scan/start",
        Some(json!({ "scanType": "quick", "targets": "127.0.0.1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "running");
    let id = parse_id(&body);

    wait_terminal(&h.engine, &id).await;

    let (status, body) = call(&app, "GET", &format!("/api/scan/status/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["scanType"], "quick");
    assert_eq!(body["targetDescriptor"], "127.0.0.1 (host)");

    let (status, body) = call(&app, "GET", &format!("/api/scan/results/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scanId"], id.to_string());
    assert_eq!(body["systemsScanned"], 1);
    assert_eq!(body["threatLevel"], "high");
    assert_eq!(body["findings"][0]["id"], "F-001");
    assert!(body["findings"][0]["cvssScore"].is_number());

    let (status, _) = call(&app, "POST", &format!("/api/scan/cancel/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn start_validates_its_input() {
    let h = harness(&completes_with(LOOPBACK_REPORT), |_| {});
    let app = router(h.engine.clone());

    let missing_type = json!({ "targets": "127.0.0.1" });
    let (status, body) = call(&app, "POST", "/api/scan/start", Some(missing_type)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required parameter: scanType");

    let missing_targets = json!({ "scanType": "quick" });
    let (status, body) = call(&app, "POST", "/api/scan/start", Some(missing_targets)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required parameter: targets");

    let (status, body) = call(
        &app,
        "POST",
        "/api/scan/start",
        Some(json!({ "scanType": "bogus", "targets": "127.0.0.1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("bogus"));

    let (status, _) = call(
        &app,
        "POST",
        "/api/scan/start",
        Some(json!({ "scanType": "quick", "targets": "--script=exploit" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn capacity_exhaustion_is_service_unavailable() {
    let h = harness(&hangs(), |c| c.max_concurrent_scans = 1);
    let app = router(h.engine.clone());
    let start = json!({ "scanType": "quick", "targets": "127.0.0.1" });

    let (status, body) = call(&app, "POST", "/api/scan/start", Some(start.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, "POST", "/api/scan/start", Some(start)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    h.engine.cancel_scan(&parse_id(&body)).await;
}

#[tokio::test]
async fn results_reflect_scan_state() {
    let h = harness(&hangs(), |_| {});
    let app = router(h.engine.clone());

    let (_, body) = call(
        &app,
        "POST",
        "/api/scan/start",
        Some(json!({ "scanType": "deep", "targets": "10.0.0.5" })),
    )
    .await;
    let id = parse_id(&body);

    let (status, body) = call(&app, "GET", &format!("/api/scan/results/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Scan in progress");
    assert!(body["currentStage"].is_string());

    let (status, body) = call(&app, "POST", &format!("/api/scan/cancel/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = call(&app, "GET", &format!("/api/scan/results/{id}"), None).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, body) = call(&app, "POST", &format!("/api/scan/cancel/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["details"].as_str().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness(&hangs(), |_| {});
    let app = router(h.engine.clone());
    let id = Uuid::new_v4();

    for (method, uri) in [
        ("GET", format!("/api/scan/status/{id}")),
        ("GET", format!("/api/scan/results/{id}")),
        ("POST", format!("/api/scan/cancel/{id}")),
        ("GET", "/api/scan/status/not-a-uuid".to_string()),
    ] {
        let (status, body) = call(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "Scan not found");
    }
}
