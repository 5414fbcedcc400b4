//! Direct-debit integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

const IBAN: &str = "de12 5001 0517 0648 4898 90";

async fn grant(harness: &TestHarness, persona_id: i64) -> i64 {
    let response = harness
        .post("/v1/lastschrift")
        .json(&json!({ "persona_id": persona_id, "iban": IBAN }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["granted"], true);
    body["result"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn permit_normalizes_iban_and_refuses_duplicates() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;

    let stored: Value = harness.get(&format!("/v1/lastschrift/{permit}")).await.json();
    assert_eq!(stored["iban"], "DE12500105170648489890");

    let response = harness
        .post("/v1/lastschrift")
        .json(&json!({ "persona_id": persona, "iban": IBAN }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["granted"], false);
    assert_eq!(body["refusal"]["code"], "duplicate_lastschrift");
    assert_eq!(body["refusal"]["existing"], permit);

    let permits: Value = harness
        .get(&format!("/v1/personas/{persona}/lastschrift"))
        .await
        .json();
    assert_eq!(permits.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn successful_collection_credits_the_annual_fee() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;

    let issued: Value = harness
        .post(&format!("/v1/lastschrift/{permit}/transactions"))
        .await
        .json();
    assert_eq!(issued["status"], "issued");
    assert_eq!(issued["amount"], "48.00");
    let transaction = issued["id"].as_i64().unwrap();

    // one open transaction at a time
    harness
        .post(&format!("/v1/lastschrift/{permit}/transactions"))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let response = harness
        .post("/v1/transactions/finalize")
        .json(&json!([{ "transaction_id": transaction, "status": "success" }]))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["outcome"], "success");
    assert_eq!(body["result"][0]["tally"], "48.00");

    let stored: Value = harness.get(&format!("/v1/personas/{persona}")).await.json();
    assert_eq!(stored["balance"], "48.00");

    // tallied transactions cannot be finalized again
    let again: Value = harness
        .post("/v1/transactions/finalize")
        .json(&json!([{ "transaction_id": transaction, "status": "failure" }]))
        .await
        .json();
    assert_eq!(again["outcome"], "failed");
    assert_eq!(again["row"], 0);

    let listed: Value = harness
        .get(&format!("/v1/transactions?lastschrift_id={permit}"))
        .await
        .json();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["status"], "success");
}

#[tokio::test]
async fn failure_revokes_the_permit() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;

    let issued: Value = harness
        .post(&format!("/v1/lastschrift/{permit}/transactions"))
        .await
        .json();

    let body: Value = harness
        .post("/v1/transactions/finalize")
        .json(&json!([{ "transaction_id": issued["id"], "status": "failure" }]))
        .await
        .json();
    assert_eq!(body["outcome"], "success");
    assert_eq!(body["result"][0]["tally"], "-4.50");

    let stored: Value = harness.get(&format!("/v1/lastschrift/{permit}")).await.json();
    assert!(!stored["revoked_at"].is_null());
}

#[tokio::test]
async fn young_permit_may_skip() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;

    let may: Value = harness
        .get(&format!("/v1/lastschrift/{permit}/skip"))
        .await
        .json();
    assert_eq!(may["may_skip"], true);

    let body: Value = harness
        .post(&format!("/v1/lastschrift/{permit}/skip"))
        .await
        .json();
    assert_eq!(body["granted"], true);
    assert_eq!(body["result"]["status"], "skipped");

    // nothing left to collect this period
    harness
        .post(&format!("/v1/lastschrift/{permit}/transactions"))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn active_permit_cannot_be_deleted() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;

    let blockers: Value = harness
        .get(&format!("/v1/lastschrift/{permit}/blockers"))
        .await
        .json();
    assert_eq!(blockers["blockers"], json!(["active"]));

    let body: Value = harness
        .delete(&format!("/v1/lastschrift/{permit}"))
        .await
        .json();
    assert_eq!(body["granted"], false);
    assert_eq!(body["refusal"]["code"], "deletion_blocked");

    harness
        .post(&format!("/v1/lastschrift/{permit}/revoke"))
        .await
        .assert_status_ok();
    let blockers: Value = harness
        .get(&format!("/v1/lastschrift/{permit}/blockers"))
        .await
        .json();
    assert_eq!(blockers["blockers"], json!(["retention_period"]));
}

#[tokio::test]
async fn rollback_books_the_return_charge() {
    let harness = TestHarness::new();
    let persona = harness.create_persona("Anton", "Armin", true).await;
    let permit = grant(&harness, persona).await;
    let issued: Value = harness
        .post(&format!("/v1/lastschrift/{permit}/transactions"))
        .await
        .json();
    let transaction = issued["id"].as_i64().unwrap();
    harness
        .post("/v1/transactions/finalize")
        .json(&json!([{ "transaction_id": transaction, "status": "success" }]))
        .await
        .assert_status_ok();

    let response = harness
        .post(&format!("/v1/transactions/{transaction}/rollback"))
        .json(&json!({ "tally": "-7.20" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "rollback");
    assert_eq!(body["tally"], "-7.20");

    let stored: Value = harness.get(&format!("/v1/personas/{persona}")).await.json();
    assert_eq!(stored["balance"], "0.00");
    let log: Value = harness.get("/v1/finance/log").await.json();
    let entry = log
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["code"] == "transaction_rollback")
        .unwrap();
    assert_eq!(entry["change_note"], format!("{transaction} tally -7.20"));
}
