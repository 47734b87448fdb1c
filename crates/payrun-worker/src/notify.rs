//! Lifecycle notification delivery
//!
//! Fire-and-forget HTTP client for the intake API's notification endpoints.
//! Events are addressed by upload id plus its opaque token, so only holders
//! of the token can subscribe to updates on the far side.
//!
//! Delivery is best-effort and at-most-once: failures are logged and
//! discarded, and they never affect the outcome or retry count of the job
//! or chunk that raised them. Consumers fall back to polling the durable
//! status.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::config::NotifierConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusChangedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub status: String,
    pub total_rows: Option<i32>,
    pub total_chunks: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCompletedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub chunk_index: i32,
    pub processed_rows: i64,
    pub succeeded_rows: i64,
    pub failed_rows: i64,
    pub total_chunks: i64,
    pub completed_chunks: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub total_rows: i32,
    pub processed_rows: i32,
    pub succeeded_rows: i32,
    pub failed_rows: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub chunk_index: i32,
    pub error: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowProgressPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
    pub chunk_index: i32,
    pub processed_in_chunk: i64,
    pub total_in_chunk: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDeletedPayload {
    pub upload_id: Uuid,
    pub token: Uuid,
}

/// HTTP notification client.
pub struct Notifier {
    client: reqwest::Client,
    base_url: String,
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build notification client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn upload_status_changed(
        &self,
        upload_id: Uuid,
        token: Uuid,
        status: &str,
        total_rows: Option<i32>,
        total_chunks: Option<i32>,
    ) {
        let payload = UploadStatusChangedPayload {
            upload_id,
            token,
            status: status.to_string(),
            total_rows,
            total_chunks,
        };
        self.post(upload_id, "upload-status-changed", &payload).await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn chunk_completed(
        &self,
        upload_id: Uuid,
        token: Uuid,
        chunk_index: i32,
        totals: crate::db::ChunkTotals,
        total_chunks: i64,
        completed_chunks: i64,
    ) {
        let payload = ChunkCompletedPayload {
            upload_id,
            token,
            chunk_index,
            processed_rows: totals.processed_rows,
            succeeded_rows: totals.succeeded_rows,
            failed_rows: totals.failed_rows,
            total_chunks,
            completed_chunks,
        };
        self.post(upload_id, "chunk-completed", &payload).await;
    }

    pub async fn upload_completed(
        &self,
        upload_id: Uuid,
        token: Uuid,
        total_rows: i32,
        processed_rows: i32,
        succeeded_rows: i32,
        failed_rows: i32,
    ) {
        let payload = UploadCompletedPayload {
            upload_id,
            token,
            total_rows,
            processed_rows,
            succeeded_rows,
            failed_rows,
        };
        self.post(upload_id, "upload-completed", &payload).await;
    }

    pub async fn upload_failed(&self, upload_id: Uuid, token: Uuid, error: &str) {
        let payload = UploadFailedPayload {
            upload_id,
            token,
            error: error.to_string(),
        };
        self.post(upload_id, "upload-failed", &payload).await;
    }

    pub async fn chunk_failed(
        &self,
        upload_id: Uuid,
        token: Uuid,
        chunk_index: i32,
        error: &str,
        attempt_count: i32,
        max_attempts: i32,
    ) {
        let payload = ChunkFailedPayload {
            upload_id,
            token,
            chunk_index,
            error: error.to_string(),
            attempt_count,
            max_attempts,
        };
        self.post(upload_id, "chunk-failed", &payload).await;
    }

    pub async fn row_progress(
        &self,
        upload_id: Uuid,
        token: Uuid,
        chunk_index: i32,
        processed_in_chunk: i64,
        total_in_chunk: i64,
    ) {
        let payload = RowProgressPayload {
            upload_id,
            token,
            chunk_index,
            processed_in_chunk,
            total_in_chunk,
        };
        self.post(upload_id, "row-progress", &payload).await;
    }

    pub async fn upload_deleted(&self, upload_id: Uuid, token: Uuid) {
        let payload = UploadDeletedPayload { upload_id, token };
        self.post(upload_id, "upload-deleted", &payload).await;
    }

    /// POST one event; failures are logged at warn and swallowed.
    async fn post<T: Serialize>(&self, upload_id: Uuid, event: &str, payload: &T) {
        let url = format!("{}/api/notifications/{}", self.base_url, event);

        match self.client.post(&url).json(payload).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    upload_id = %upload_id,
                    event,
                    status = %response.status(),
                    "Notification endpoint rejected event"
                );
            },
            Ok(_) => {},
            Err(e) => {
                tracing::warn!(
                    upload_id = %upload_id,
                    event,
                    error = %e,
                    "Failed to deliver notification"
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_serialize_camel_case() {
        let upload_id = Uuid::new_v4();
        let token = Uuid::new_v4();

        let payload = ChunkCompletedPayload {
            upload_id,
            token,
            chunk_index: 2,
            processed_rows: 300,
            succeeded_rows: 290,
            failed_rows: 10,
            total_chunks: 3,
            completed_chunks: 2,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["uploadId"], serde_json::json!(upload_id.to_string()));
        assert_eq!(json["chunkIndex"], serde_json::json!(2));
        assert_eq!(json["processedRows"], serde_json::json!(300));
        assert_eq!(json["completedChunks"], serde_json::json!(2));
    }

    #[test]
    fn test_status_payload_keeps_optional_fields() {
        let payload = UploadStatusChangedPayload {
            upload_id: Uuid::new_v4(),
            token: Uuid::new_v4(),
            status: "Parsing".to_string(),
            total_rows: None,
            total_chunks: None,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("totalRows").is_some());
        assert!(json["totalRows"].is_null());
    }
}
