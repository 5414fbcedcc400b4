//! Semester and ExPuls period integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::Value;

#[tokio::test]
async fn fresh_database_starts_in_period_one() {
    let harness = TestHarness::new();

    let response = harness.get("/v1/semester").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["period"]["id"], 1);
    assert_eq!(body["startable"], serde_json::json!(["billing"]));
}

#[tokio::test]
async fn steps_out_of_order_are_rejected() {
    let harness = TestHarness::new();

    let response = harness.post("/v1/semester/steps/ejection/run").await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "precondition_failed");

    let may_start: Value = harness.get("/v1/semester/steps/ejection").await.json();
    assert_eq!(may_start["may_start"], false);
}

#[tokio::test]
async fn unknown_step_is_rejected() {
    let harness = TestHarness::new();

    let response = harness.post("/v1/semester/steps/payday/run").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_semester_cycle() {
    let harness = TestHarness::new();
    let anton = harness.create_persona("Anton", "Armin", true).await;
    let berta = harness.create_persona("Berta", "Beispiel", true).await;
    harness.fund(anton, "100.00").await;
    harness.fund(berta, "10.00").await;

    for step in ["billing", "archival_notification"] {
        harness
            .post(&format!("/v1/semester/steps/{step}/run"))
            .await
            .assert_status_ok();
    }

    let ejection: Value = harness
        .post("/v1/semester/steps/ejection/run")
        .await
        .json();
    assert_eq!(ejection["affected"], 1);
    assert_eq!(ejection["amount"], "10.00");

    // advancing too early
    harness
        .post("/v1/semester/advance")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    harness
        .post("/v1/semester/steps/archival/finish")
        .await
        .assert_status_ok();

    let balance: Value = harness
        .post("/v1/semester/steps/balance/run")
        .await
        .json();
    assert_eq!(balance["affected"], 1);
    assert_eq!(balance["amount"], "24.00");

    let anton: Value = harness.get(&format!("/v1/personas/{anton}")).await.json();
    assert_eq!(anton["balance"], "76.00");
    let berta: Value = harness.get(&format!("/v1/personas/{berta}")).await.json();
    assert_eq!(berta["is_member"], false);

    let next: Value = harness.post("/v1/semester/advance").await.json();
    assert_eq!(next["id"], 2);
    assert!(next["billing_done"].is_null());
}

#[tokio::test]
async fn expuls_cycle() {
    let harness = TestHarness::new();
    harness.create_persona("Anton", "Armin", true).await;

    let status: Value = harness.get("/v1/expuls").await.json();
    assert_eq!(status["may_start_addresscheck"], true);

    harness
        .post("/v1/expuls/advance")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let period: Value = harness.post("/v1/expuls/addresscheck").await.json();
    assert_eq!(period["addresscheck_count"], 1);

    harness
        .post("/v1/expuls/addresscheck")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let next: Value = harness.post("/v1/expuls/advance").await.json();
    assert_eq!(next["id"], 2);
}
