//! Event, fee and partial import integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

struct Academy {
    event_id: i64,
    first_half: String,
    second_half: String,
}

async fn create_academy(harness: &TestHarness) -> Academy {
    let response = harness
        .post("/v1/events")
        .json(&json!({
            "title": "Sommerakademie",
            "shortname": "sak",
            "parts": [
                {
                    "title": "Erste Hälfte", "shortname": "H1",
                    "part_begin": "2026-08-01", "part_end": "2026-08-07",
                    "fee": "120.00",
                    "tracks": [{ "title": "Kursschiene", "shortname": "KS", "num_choices": 3, "min_choices": 1 }]
                },
                {
                    "title": "Zweite Hälfte", "shortname": "H2",
                    "part_begin": "2026-08-08", "part_end": "2026-08-14",
                    "fee": "95.50"
                }
            ],
            "fields": [{ "field_name": "is_child", "kind": "bool", "association": "registration" }],
            "fee_modifiers": [{
                "part": "H1", "field_name": "is_child",
                "modifier_name": "child_discount", "amount": "-20.00"
            }],
            "nonmember_surcharge": "5.00"
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let event: Value = response.json();

    let parts = event["parts"].as_object().unwrap();
    let part_id = |shortname: &str| {
        parts
            .iter()
            .find(|(_, part)| part["shortname"] == shortname)
            .map(|(id, _)| id.clone())
            .unwrap()
    };
    Academy {
        event_id: event["id"].as_i64().unwrap(),
        first_half: part_id("H1"),
        second_half: part_id("H2"),
    }
}

async fn register(harness: &TestHarness, academy: &Academy, persona_id: i64, body: Value) -> Value {
    let mut body = body;
    body["persona_id"] = json!(persona_id);
    let response = harness
        .post(&format!("/v1/events/{}/registrations", academy.event_id))
        .json(&body)
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn registration_fee_follows_parts_fields_and_membership() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;
    let anton = harness.create_persona("Anton", "Armin", true).await;
    let berta = harness.create_persona("Berta", "Beispiel", false).await;

    let member = register(
        &harness,
        &academy,
        anton,
        json!({ "parts": { &academy.first_half: { "status": "applied" } } }),
    )
    .await;
    assert_eq!(member["granted"], true);
    assert_eq!(member["result"]["amount_owed"], "120.00");

    let guest = register(
        &harness,
        &academy,
        berta,
        json!({
            "parts": {
                &academy.first_half: { "status": "participant" },
                &academy.second_half: { "status": "waitlist" }
            },
            "fields": { "is_child": true }
        }),
    )
    .await;
    assert_eq!(guest["result"]["amount_owed"], "200.50");

    let duplicate = register(&harness, &academy, anton, json!({})).await;
    assert_eq!(duplicate["granted"], false);
    assert_eq!(duplicate["refusal"]["code"], "duplicate_registration");
}

#[tokio::test]
async fn fee_changes_recompute_registrations() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;
    let anton = harness.create_persona("Anton", "Armin", true).await;
    let registration = register(
        &harness,
        &academy,
        anton,
        json!({ "parts": { &academy.first_half: { "status": "applied" } } }),
    )
    .await["result"]["id"]
        .as_i64()
        .unwrap();

    harness
        .patch(&format!("/v1/events/{}/fees", academy.event_id))
        .json(&json!({ "part_fees": { &academy.first_half: "150.00" } }))
        .await
        .assert_status_ok();

    let stored: Value = harness
        .get(&format!("/v1/registrations/{registration}"))
        .await
        .json();
    assert_eq!(stored["amount_owed"], "150.00");

    let updated: Value = harness
        .patch(&format!("/v1/registrations/{registration}"))
        .json(&json!({ "fields": { "is_child": true } }))
        .await
        .json();
    assert_eq!(updated["amount_owed"], "130.00");
}

#[tokio::test]
async fn fee_preview_stores_nothing() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;

    let response = harness
        .post(&format!("/v1/events/{}/fees/preview", academy.event_id))
        .json(&json!({
            "is_member": false,
            "parts": { &academy.first_half: "participant" },
            "fields": { "is_child": true }
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["fee"], "105.00");

    let registrations: Value = harness
        .get(&format!("/v1/events/{}/registrations", academy.event_id))
        .await
        .json();
    assert!(registrations.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn payments_are_booked() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;
    let anton = harness.create_persona("Anton", "Armin", true).await;
    let registration = register(
        &harness,
        &academy,
        anton,
        json!({ "parts": { &academy.first_half: { "status": "applied" } } }),
    )
    .await["result"]["id"]
        .as_i64()
        .unwrap();

    let body: Value = harness
        .post(&format!("/v1/events/{}/fees/payments", academy.event_id))
        .json(&json!([{ "registration_id": registration, "amount": "120.00", "date": "2026-07-01" }]))
        .await
        .json();

    assert_eq!(body["outcome"], "success");
    assert_eq!(body["result"][0]["amount_paid"], "120.00");
    assert_eq!(body["result"][0]["payment"], "2026-07-01");
}

#[tokio::test]
async fn offline_lock_blocks_online_changes() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;
    let anton = harness.create_persona("Anton", "Armin", true).await;

    let event: Value = harness
        .put(&format!("/v1/events/{}/lock", academy.event_id))
        .json(&json!({ "locked": true }))
        .await
        .json();
    assert_eq!(event["offline_lock"], true);

    let response = harness
        .post(&format!("/v1/events/{}/registrations", academy.event_id))
        .json(&json!({ "persona_id": anton }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn partial_import_round_trip() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;

    let export: Value = harness
        .get(&format!("/v1/events/{}/export", academy.event_id))
        .await
        .json();
    assert_eq!(export["kind"], "partial");
    assert_eq!(export["CDEDB_EXPORT_EVENT_VERSION"], 15);

    let data = json!({
        "id": academy.event_id,
        "lodgement_groups": { "-1": { "title": "Haupthaus" } },
        "lodgements": { "-1": { "title": "Zimmer 1", "group_id": -1, "regular_capacity": 4 } }
    });

    let dry: Value = harness
        .post(&format!("/v1/events/{}/import", academy.event_id))
        .json(&json!({ "data": data, "dryrun": true }))
        .await
        .json();
    assert_eq!(dry["dryrun"], true);

    let export: Value = harness
        .get(&format!("/v1/events/{}/export", academy.event_id))
        .await
        .json();
    assert!(export["lodgements"].as_object().unwrap().is_empty());

    let real: Value = harness
        .post(&format!("/v1/events/{}/import", academy.event_id))
        .json(&json!({ "data": data, "token": dry["token"] }))
        .await
        .json();
    assert_eq!(real["token"], dry["token"]);
    let lodgement_id = real["id_map"]["lodgements"]["-1"].as_i64().unwrap();
    let group_id = real["id_map"]["lodgement_groups"]["-1"].clone();

    let export: Value = harness
        .get(&format!("/v1/events/{}/export", academy.event_id))
        .await
        .json();
    assert_eq!(export["lodgements"][lodgement_id.to_string()]["group_id"], group_id);
}

#[tokio::test]
async fn stale_import_token_conflicts() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;
    let anton = harness.create_persona("Anton", "Armin", true).await;
    let registration = register(
        &harness,
        &academy,
        anton,
        json!({ "parts": { &academy.first_half: { "status": "applied" } } }),
    )
    .await["result"]["id"]
        .as_i64()
        .unwrap();
    let path = format!("/v1/events/{}/import", academy.event_id);
    let notes = |notes: &str| {
        json!({
            "id": academy.event_id,
            "registrations": { registration.to_string(): { "notes": notes } }
        })
    };

    let dry: Value = harness
        .post(&path)
        .json(&json!({ "data": notes("offline"), "dryrun": true }))
        .await
        .json();

    // someone edits the same registration before the real import
    harness
        .post(&path)
        .json(&json!({ "data": notes("online") }))
        .await
        .assert_status_ok();

    let response = harness
        .post(&path)
        .json(&json!({ "data": notes("offline"), "token": dry["token"] }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "partial_import_conflict");

    let stored: Value = harness
        .get(&format!("/v1/registrations/{registration}"))
        .await
        .json();
    assert_eq!(stored["notes"], "online");
}

#[tokio::test]
async fn import_for_other_event_is_rejected() {
    let harness = TestHarness::new();
    let academy = create_academy(&harness).await;

    let response = harness
        .post(&format!("/v1/events/{}/import", academy.event_id))
        .json(&json!({ "data": { "id": academy.event_id + 1 } }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
