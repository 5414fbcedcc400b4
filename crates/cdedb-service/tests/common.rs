//! Common test utilities for cdedb integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};
use tempfile::TempDir;

use cdedb_service::{create_router, AppState, ServiceConfig, StoreBackend};
use cdedb_store::RocksStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The service API key for authenticated requests.
    pub service_api_key: String,
    /// Persona sent as `x-persona-id`.
    pub acting_persona: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let service_api_key = "test-service-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            store_backend: StoreBackend::RocksDb,
            service_api_key: Some(service_api_key.clone()),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            cde: cdedb_core::CdeConfig::default(),
        };

        let state = AppState::new(Arc::new(store), config)
            .expect("Failed to build app state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            service_api_key,
            acting_persona: "1".into(),
        }
    }

    /// Attach the service key and acting persona.
    pub fn auth(&self, request: TestRequest) -> TestRequest {
        request
            .add_header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_str(&self.service_api_key).unwrap(),
            )
            .add_header(
                HeaderName::from_static("x-service-name"),
                HeaderValue::from_static("cdedb-frontend"),
            )
            .add_header(
                HeaderName::from_static("x-persona-id"),
                HeaderValue::from_str(&self.acting_persona).unwrap(),
            )
    }

    pub fn get(&self, path: &str) -> TestRequest {
        self.auth(self.server.get(path))
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.auth(self.server.post(path))
    }

    pub fn patch(&self, path: &str) -> TestRequest {
        self.auth(self.server.patch(path))
    }

    pub fn put(&self, path: &str) -> TestRequest {
        self.auth(self.server.put(path))
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        self.auth(self.server.delete(path))
    }

    /// Create a persona and return its id.
    pub async fn create_persona(&self, given_names: &str, family_name: &str, is_member: bool) -> i64 {
        let response = self
            .post("/v1/personas")
            .json(&json!({
                "given_names": given_names,
                "family_name": family_name,
                "is_member": is_member
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["id"].as_i64().expect("persona id")
    }

    /// Credit a persona through a money transfer batch.
    pub async fn fund(&self, persona_id: i64, amount: &str) {
        let response = self
            .post("/v1/finance/transfers")
            .json(&json!([{ "persona_id": persona_id, "amount": amount }]))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["outcome"], "success");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
