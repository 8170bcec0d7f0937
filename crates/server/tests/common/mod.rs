//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock dependencies injected, enabling comprehensive E2E testing
//! without network access.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use curator_core::{
    create_authenticator, load_config_from_str,
    store::{Completion, StructuredError},
    testing::{MockPublishClient, MockSourceHandler},
    Authenticator, SourceRegistry, SqliteUploadStore, UploadStore,
};
use curator_server::{create_router, AppState, Services};

/// Re-export fixtures for test convenience
pub use curator_core::testing::fixtures;

/// API keys of the fixture users. `root` is an admin.
pub const ALICE: &str = "alice-key";
pub const BOB: &str = "bob-key";
pub const ROOT: &str = "root-key";

/// Test fixture for E2E testing with mock dependencies.
///
/// Provides an in-process server with fully controllable mocks for:
/// - Source provider (MockSourceHandler)
/// - Remote repository (MockPublishClient)
///
/// The upload store is exposed so tests can seed batches and move
/// requests through the pipeline states directly. Workers are not started.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_list_batches() {
///     let fixture = TestFixture::new().await;
///     fixture.seed_batch("alice", &["1", "2"]);
///
///     let response = fixture.get_as(ALICE, "/api/v1/batches").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Upload store shared with the router
    pub store: Arc<SqliteUploadStore>,
    /// Mock source provider
    pub source: Arc<MockSourceHandler>,
    /// Mock remote repository
    pub publisher: Arc<MockPublishClient>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = load_config_from_str(&format!(
            r#"
[auth]
method = "api_key"
admins = ["root"]
api_keys = [
    {{ key = "{}", user_id = "alice" }},
    {{ key = "{}", user_id = "bob" }},
    {{ key = "{}", user_id = "root" }},
]

[server]
host = "127.0.0.1"
port = 8080

[database]
path = "{}"

[workers]
enabled = false
"#,
            ALICE,
            BOB,
            ROOT,
            db_path.display()
        ))
        .expect("Failed to parse test config");

        let store = Arc::new(SqliteUploadStore::new(&db_path).expect("Failed to create store"));
        let source = Arc::new(MockSourceHandler::new());
        let publisher = Arc::new(MockPublishClient::new());

        let authenticator: Arc<dyn Authenticator> = Arc::from(
            create_authenticator(&config.auth).expect("Failed to create authenticator"),
        );
        let services = Services::build(
            &config,
            Arc::clone(&store) as Arc<dyn UploadStore>,
            Arc::new(SourceRegistry::new().with_handler(source.clone())),
            publisher.clone(),
        )
        .expect("Failed to build services");

        let state = Arc::new(AppState::new(config, authenticator, services));
        let router = create_router(state);

        Self {
            router,
            store,
            source,
            publisher,
            temp_dir,
        }
    }

    /// Create a batch owned by `user` with one queued request per key.
    pub fn seed_batch(&self, user: &str, keys: &[&str]) -> (i64, Vec<i64>) {
        let batch = self
            .store
            .create_batch(user, "0123456789ab")
            .expect("Failed to create batch");
        let items: Vec<_> = keys
            .iter()
            .map(|key| {
                fixtures::upload_item(key).with_credential(Some(format!("{}-token", user)))
            })
            .collect();
        let ids = self
            .store
            .create_requests(batch.id, user, &items)
            .expect("Failed to create requests")
            .iter()
            .map(|r| r.id)
            .collect();
        (batch.id, ids)
    }

    /// Run a request through to a failure.
    pub fn fail(&self, id: i64, message: &str) {
        self.finish(id, Completion::failed(StructuredError::error(message)));
    }

    pub fn finish(&self, id: i64, completion: Completion) {
        let handle = format!("test-{}", id);
        self.store.attach_task_handle(id, &handle).unwrap();
        self.store.begin_processing(id, &handle).unwrap();
        self.store.finish(id, &completion).unwrap();
    }

    /// Send an unauthenticated GET request.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    /// Send a GET request with an API key.
    pub async fn get_as(&self, key: &str, path: &str) -> TestResponse {
        self.request("GET", path, Some(key), None).await
    }

    /// Send a POST request with an API key and optional JSON body.
    pub async fn post_as(&self, key: &str, path: &str, body: Option<Value>) -> TestResponse {
        self.request("POST", path, Some(key), body).await
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        key: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            request_builder = request_builder
                .header("Authorization", format!("Bearer {}", key))
                .header("X-Remote-Token", format!("remote-{}", key));
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
