//! Health and authentication integration tests.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use common::TestHarness;
use serde_json::Value;

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "cdedb");
}

#[tokio::test]
async fn api_requires_service_key() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/personas").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn wrong_service_key_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/personas")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("not-the-key"),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_persona_header_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/personas")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(&harness.service_api_key).unwrap(),
        )
        .add_header(
            HeaderName::from_static("x-persona-id"),
            HeaderValue::from_static("anton"),
        )
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_persona_is_not_found() {
    let harness = TestHarness::new();

    let response = harness.get("/v1/personas/4711").await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "not_found");
}
