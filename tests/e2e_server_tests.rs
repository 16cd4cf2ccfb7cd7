//! End-to-end tests for the operational HTTP endpoints

mod common;

use common::TestServer;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_health_reports_durable_tier() {
    let server = TestServer::spawn().await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["durable_tier"], "ok");
}

#[tokio::test]
async fn test_status_snapshot_counts_queue() {
    let server = TestServer::spawn().await;
    server.pipeline.register("a");
    server.pipeline.register("b");
    server
        .pipeline
        .queue()
        .enqueue("a", "https://videos.example/a", 0)
        .unwrap();

    let response = reqwest::get(server.url("/v1/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    let downloads = &body["downloads"];
    let queued = downloads["pending"].as_u64().unwrap()
        + downloads["in_progress"].as_u64().unwrap()
        + downloads["completed"].as_u64().unwrap();
    assert_eq!(queued, 1);
    assert_eq!(body["posts"]["queued"], 0);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 7);
    assert!(body["storage"].is_object());
}

#[tokio::test]
async fn test_trigger_job_endpoint() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/v1/jobs/no_such_job/trigger"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(server.url("/v1/jobs/lease_recovery/trigger"))
        .send()
        .await
        .unwrap();
    assert!(
        response.status() == StatusCode::ACCEPTED || response.status() == StatusCode::CONFLICT,
        "unexpected status {}",
        response.status()
    );
    assert!(server.coordinator.job_exists("lease_recovery").await);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_pipeline_metrics() {
    let server = TestServer::spawn().await;
    // One request so the request counter has a sample.
    reqwest::get(server.url("/v1/status")).await.unwrap();

    let response = reqwest::get(server.url("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("reposter_http_requests_total"));
}
