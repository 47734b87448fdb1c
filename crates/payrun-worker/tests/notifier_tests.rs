//! Notifier contract tests
//!
//! Verifies the HTTP payloads against a mock intake API and that delivery
//! failures are swallowed rather than propagated.

use payrun_worker::config::NotifierConfig;
use payrun_worker::db::ChunkTotals;
use payrun_worker::Notifier;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notifier_for(url: &str) -> Notifier {
    Notifier::new(&NotifierConfig {
        base_url: url.to_string(),
        timeout_secs: 2,
    })
    .unwrap()
}

#[tokio::test]
async fn upload_status_changed_posts_expected_payload() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/upload-status-changed"))
        .and(body_partial_json(serde_json::json!({
            "uploadId": upload_id,
            "token": token,
            "status": "Validating",
            "totalRows": 2500,
            "totalChunks": 3,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .upload_status_changed(upload_id, token, "Validating", Some(2500), Some(3))
        .await;
}

#[tokio::test]
async fn chunk_completed_carries_cumulative_totals() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/chunk-completed"))
        .and(body_partial_json(serde_json::json!({
            "uploadId": upload_id,
            "chunkIndex": 1,
            "processedRows": 2000,
            "succeededRows": 1980,
            "failedRows": 20,
            "totalChunks": 3,
            "completedChunks": 2,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .chunk_completed(
            upload_id,
            token,
            1,
            ChunkTotals {
                processed_rows: 2000,
                succeeded_rows: 1980,
                failed_rows: 20,
            },
            3,
            2,
        )
        .await;
}

#[tokio::test]
async fn upload_failed_posts_error_string() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/upload-failed"))
        .and(body_partial_json(serde_json::json!({
            "uploadId": upload_id,
            "error": "CSV is empty",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .upload_failed(upload_id, token, "CSV is empty")
        .await;
}

#[tokio::test]
async fn chunk_failed_includes_attempt_budget() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/chunk-failed"))
        .and(body_partial_json(serde_json::json!({
            "chunkIndex": 2,
            "attemptCount": 3,
            "maxAttempts": 5,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .chunk_failed(upload_id, token, 2, "boom", 3, 5)
        .await;
}

#[tokio::test]
async fn upload_deleted_posts_id_and_token_only() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/upload-deleted"))
        .and(body_partial_json(serde_json::json!({
            "uploadId": upload_id,
            "token": token,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .upload_deleted(upload_id, token)
        .await;
}

#[tokio::test]
async fn row_progress_posts_cumulative_counts() {
    let server = MockServer::start().await;
    let upload_id = Uuid::new_v4();
    let token = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/api/notifications/row-progress"))
        .and(body_partial_json(serde_json::json!({
            "chunkIndex": 0,
            "processedInChunk": 1100,
            "totalInChunk": 1050,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .row_progress(upload_id, token, 0, 1100, 1050)
        .await;
}

#[tokio::test]
async fn delivery_failure_is_swallowed() {
    // nothing is listening on this port
    let notifier = notifier_for("http://127.0.0.1:9");

    // must not panic or error; failure is logged and discarded
    notifier
        .upload_status_changed(Uuid::new_v4(), Uuid::new_v4(), "Parsing", None, None)
        .await;
}

#[tokio::test]
async fn server_side_rejection_is_swallowed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/notifications/upload-completed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server.uri())
        .upload_completed(Uuid::new_v4(), Uuid::new_v4(), 10, 10, 10, 0)
        .await;
}
