//! End-to-end tests with mocked external dependencies.
//!
//! These tests run the full server stack in-process with mock implementations
//! for the source provider and the remote repository.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use curator_core::UploadStore;

use common::{TestFixture, ALICE, BOB, ROOT};

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["workers"]["running"], false);
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["method"], "api_key");
    assert_eq!(response.body["auth"]["api_keys_configured"], 3);
    assert!(!response.text.contains(ALICE));
    assert!(!response.text.contains(ROOT));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/api/v1/metrics").await;
    assert_status!(response, StatusCode::OK);
    assert!(response.text.contains("curator_http_requests_total"));
    assert!(response.text.contains("curator_workers_running"));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_protected_routes_require_api_key() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/batches").await;
    assert_status!(response, StatusCode::UNAUTHORIZED);

    let response = fixture.get_as("wrong-key", "/api/v1/batches").await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Batch Listing
// =============================================================================

#[tokio::test]
async fn test_list_batches_only_shows_own() {
    let fixture = TestFixture::new().await;
    fixture.seed_batch("alice", &["1", "2"]);
    fixture.seed_batch("alice", &["3"]);
    fixture.seed_batch("bob", &["4"]);

    let response = fixture.get_as(ALICE, "/api/v1/batches").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);

    let batches = response.body["batches"].as_array().unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b["user_id"] == "alice"));
}

#[tokio::test]
async fn test_list_batches_pagination() {
    let fixture = TestFixture::new().await;
    for key in ["1", "2", "3"] {
        fixture.seed_batch("alice", &[key]);
    }

    let response = fixture
        .get_as(ALICE, "/api/v1/batches?limit=2&offset=0")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["batches"].as_array().unwrap().len(), 2);
    assert_eq!(response.body["total"], 3);
    assert_eq!(response.body["limit"], 2);

    let response = fixture
        .get_as(ALICE, "/api/v1/batches?limit=2&offset=2")
        .await;
    assert_eq!(response.body["batches"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_batches_of_other_user_requires_admin() {
    let fixture = TestFixture::new().await;
    fixture.seed_batch("bob", &["1"]);

    let response = fixture.get_as(ALICE, "/api/v1/batches?user_id=bob").await;
    assert_status!(response, StatusCode::FORBIDDEN);

    let response = fixture.get_as(ROOT, "/api/v1/batches?user_id=bob").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["batches"][0]["user_id"], "bob");
}

// =============================================================================
// Single Batch
// =============================================================================

#[tokio::test]
async fn test_get_batch_with_stats() {
    let fixture = TestFixture::new().await;
    let (batch_id, ids) = fixture.seed_batch("alice", &["1", "2", "3"]);
    fixture.fail(ids[0], "upload failed");

    let response = fixture
        .get_as(ALICE, &format!("/api/v1/batches/{}", batch_id))
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], batch_id);
    assert_eq!(response.body["user_id"], "alice");
    assert_eq!(response.body["stats"]["total"], 3);
    assert_eq!(response.body["stats"]["queued"], 2);
    assert_eq!(response.body["stats"]["failed"], 1);
}

#[tokio::test]
async fn test_get_batch_not_found() {
    let fixture = TestFixture::new().await;
    let response = fixture.get_as(ALICE, "/api/v1/batches/999").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn test_get_batch_of_other_user_is_forbidden() {
    let fixture = TestFixture::new().await;
    let (batch_id, _) = fixture.seed_batch("bob", &["1"]);

    let response = fixture
        .get_as(ALICE, &format!("/api/v1/batches/{}", batch_id))
        .await;
    assert_status!(response, StatusCode::FORBIDDEN);

    // Admins see every batch
    let response = fixture
        .get_as(ROOT, &format!("/api/v1/batches/{}", batch_id))
        .await;
    assert_status!(response, StatusCode::OK);
}

#[tokio::test]
async fn test_list_uploads_hides_credentials() {
    let fixture = TestFixture::new().await;
    let (batch_id, ids) = fixture.seed_batch("alice", &["10", "11"]);

    let response = fixture
        .get_as(ALICE, &format!("/api/v1/batches/{}/uploads", batch_id))
        .await;

    assert_status!(response, StatusCode::OK);
    let uploads = response.body.as_array().unwrap();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0]["id"], ids[0]);
    assert_eq!(uploads[0]["key"], "10");
    assert_eq!(uploads[0]["status"], "queued");
    assert!(uploads[0].get("credential").is_none());
    assert!(!response.text.contains("alice-token"));
}

// =============================================================================
// Cancel
// =============================================================================

#[tokio::test]
async fn test_cancel_batch() {
    let fixture = TestFixture::new().await;
    let (batch_id, ids) = fixture.seed_batch("alice", &["1", "2", "3"]);
    fixture.fail(ids[2], "upload failed");

    let response = fixture
        .post_as(ALICE, &format!("/api/v1/batches/{}/cancel", batch_id), None)
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["batch_id"], batch_id);
    assert_eq!(response.body["cancelled"], 2);

    let stats = fixture.store.batch_stats(batch_id).unwrap();
    assert_eq!(stats.cancelled, 2);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_cancel_batch_of_other_user_is_forbidden() {
    let fixture = TestFixture::new().await;
    let (batch_id, _) = fixture.seed_batch("alice", &["1"]);

    let response = fixture
        .post_as(BOB, &format!("/api/v1/batches/{}/cancel", batch_id), None)
        .await;
    assert_status!(response, StatusCode::FORBIDDEN);

    let stats = fixture.store.batch_stats(batch_id).unwrap();
    assert_eq!(stats.queued, 1);
}

#[tokio::test]
async fn test_cancel_missing_batch() {
    let fixture = TestFixture::new().await;
    let response = fixture.post_as(ALICE, "/api/v1/batches/42/cancel", None).await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_retry_batch_copies_failed_uploads() {
    let fixture = TestFixture::new().await;
    let (batch_id, ids) = fixture.seed_batch("alice", &["1", "2", "3"]);
    fixture.fail(ids[0], "upload failed");
    fixture.fail(ids[2], "upload failed");

    let response = fixture
        .post_as(ALICE, &format!("/api/v1/batches/{}/retry", batch_id), None)
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["retried"], 2);
    let new_batch_id = response.body["new_batch_id"].as_i64().unwrap();
    assert_ne!(new_batch_id, batch_id);

    let copies = fixture.store.list_requests(new_batch_id).unwrap();
    let keys: Vec<_> = copies.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["1", "3"]);
    assert_eq!(copies[0].user_id, "alice");

    // The original batch is unchanged
    let stats = fixture.store.batch_stats(batch_id).unwrap();
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn test_retry_batch_without_failures() {
    let fixture = TestFixture::new().await;
    let (batch_id, _) = fixture.seed_batch("alice", &["1"]);

    let response = fixture
        .post_as(ALICE, &format!("/api/v1/batches/{}/retry", batch_id), None)
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["retried"], 0);
    assert!(response.body["new_batch_id"].is_null());
}

#[tokio::test]
async fn test_admin_retry_requires_admin() {
    let fixture = TestFixture::new().await;
    let (_, ids) = fixture.seed_batch("alice", &["1"]);
    fixture.fail(ids[0], "upload failed");

    let response = fixture
        .post_as(ALICE, "/api/v1/admin/retry", Some(json!({ "upload_ids": ids })))
        .await;

    assert_status!(response, StatusCode::FORBIDDEN);
    assert_eq!(response.body["error"], "Admin rights required");
}

#[tokio::test]
async fn test_admin_retry_across_users() {
    let fixture = TestFixture::new().await;
    let (_, alice_ids) = fixture.seed_batch("alice", &["1", "2"]);
    let (_, bob_ids) = fixture.seed_batch("bob", &["3"]);
    fixture.fail(alice_ids[0], "upload failed");
    fixture.fail(bob_ids[0], "upload failed");

    // alice_ids[1] is still queued and is skipped
    let response = fixture
        .post_as(
            ROOT,
            "/api/v1/admin/retry",
            Some(json!({ "upload_ids": [alice_ids[0], alice_ids[1], bob_ids[0], 999] })),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["requested"], 4);
    assert_eq!(response.body["retried"], 2);

    let new_batch_id = response.body["new_batch_id"].as_i64().unwrap();
    let copies = fixture.store.list_requests(new_batch_id).unwrap();
    assert_eq!(copies.len(), 2);
}
