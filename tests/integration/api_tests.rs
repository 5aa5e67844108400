//! API integration tests for the HTTP layer.
//!
//! Tests verify:
//! - Status codes and JSON error bodies
//! - SSE progress stream order
//! - Model generation, status polling and download over HTTP
//! - Clearing series

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tissue_recon::pipeline::{Pipeline, PipelineConfig};
use tissue_recon::volume::InMemoryVolumeSource;
use tissue_recon::{create_router, RouterConfig};

use super::test_utils::phantom_volume;

fn test_router() -> Router {
    let source = InMemoryVolumeSource::new().with_volume("ct-1", phantom_volume(3));
    let pipeline = Pipeline::new(source, PipelineConfig::default());
    create_router(pipeline, RouterConfig::new().with_tracing(false))
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(router, method, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Poll `uri` until the JSON field `status` equals `expected`.
async fn wait_for_status(router: &Router, uri: &str, expected: &str) -> Value {
    for _ in 0..1000 {
        let (code, json) = send_json(router, Method::GET, uri).await;
        if code == StatusCode::OK && json["status"] == expected {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached status {}", uri, expected);
}

// =============================================================================
// Health and legend
// =============================================================================

#[tokio::test]
async fn test_health() {
    let router = test_router();
    let (status, json) = send_json(&router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_legend() {
    let router = test_router();
    let (status, json) = send_json(&router, Method::GET, "/legend").await;
    assert_eq!(status, StatusCode::OK);

    let tissues = json["tissues"].as_array().unwrap();
    assert_eq!(tissues.len(), 5);
    let visceral = tissues
        .iter()
        .find(|t| t["label"] == "visceral_fat")
        .unwrap();
    assert_eq!(visceral["color"], "#FFA500");
}

// =============================================================================
// Analysis
// =============================================================================

#[tokio::test]
async fn test_analysis_not_found_before_start() {
    let router = test_router();

    let (status, json) = send_json(&router, Method::GET, "/analysis/ct-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);

    let (status, _) = send(&router, Method::GET, "/analysis/ct-1/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_analysis_and_fetch_result() {
    let router = test_router();

    let (status, json) = send_json(&router, Method::POST, "/analysis/ct-1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["series_id"], "ct-1");
    assert_eq!(json["kind"], "analysis");

    wait_for_status(&router, "/analysis/ct-1/status", "complete").await;

    let (status, json) = send_json(&router, Method::GET, "/analysis/ct-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["slice_count"], 3);
    assert_eq!(json["distribution_formula"], "total-fat");
    assert!(json["total_visceral_fat_volume_cm3"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_analysis_stream_events() {
    let router = test_router();

    let request = Request::builder()
        .uri("/analysis/ct-1/stream")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // The stream ends after the terminal event.
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();

    let names: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(
        names,
        vec!["start", "progress", "progress", "progress", "complete"]
    );

    let last_data = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .last()
        .unwrap();
    let last: Value = serde_json::from_str(last_data).unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["current_image"], 3);
    assert_eq!(last["data"]["series_id"], "ct-1");

    let (status, _) = send(&router, Method::GET, "/analysis/ct-1").await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Models
// =============================================================================

#[tokio::test]
async fn test_model_conflict_without_analysis() {
    let router = test_router();
    let (status, json) = send_json(&router, Method::POST, "/models/ct-1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "analysis_required");

    let (status, json) = send_json(&router, Method::GET, "/models/ct-1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "not_started");
}

#[tokio::test]
async fn test_model_invalid_include() {
    let router = test_router();
    let (status, json) = send_json(&router, Method::POST, "/models/ct-1?include=liver").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn test_download_without_model() {
    let router = test_router();
    let (status, _) = send(&router, Method::GET, "/models/ct-1/download").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_model_flow() {
    let router = test_router();

    send(&router, Method::POST, "/analysis/ct-1").await;
    wait_for_status(&router, "/analysis/ct-1/status", "complete").await;

    let (status, json) = send_json(
        &router,
        Method::POST,
        "/models/ct-1?include=visceral_fat,subcutaneous_fat",
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["series_id"], "ct-1");

    let json = wait_for_status(&router, "/models/ct-1/status", "complete").await;
    assert_eq!(json["progress"], 100);
    let tissues = json["data"]["tissues"].as_array().unwrap();
    assert_eq!(tissues.len(), 2);
    assert_eq!(tissues[0]["label"], "visceral_fat");
    assert_eq!(tissues[0]["color"], "#FFA500");

    let request = Request::builder()
        .uri("/models/ct-1/download?format=mesh-text")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("ct-1_model.obj"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("o visceral_fat"));
    assert!(text.contains("o subcutaneous_fat"));

    let (status, body) = send(&router, Method::GET, "/models/ct-1/download").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"ply\n"));

    let (status, _) = send(&router, Method::GET, "/models/ct-1/download?format=stl").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Clearing
// =============================================================================

#[tokio::test]
async fn test_clear_series() {
    let router = test_router();
    send(&router, Method::POST, "/analysis/ct-1").await;
    wait_for_status(&router, "/analysis/ct-1/status", "complete").await;

    let (status, json) = send_json(&router, Method::DELETE, "/series/ct-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["series_id"], "ct-1");

    let (status, _) = send(&router, Method::GET, "/analysis/ct-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown series and clear-all are both fine to repeat.
    let (status, _) = send(&router, Method::DELETE, "/series/unknown").await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send_json(&router, Method::DELETE, "/series").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("series_id").is_none());
}
