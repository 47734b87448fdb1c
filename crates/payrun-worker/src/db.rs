//! Upload-level queries shared by the runners
//!
//! Every status write on the shared Upload record goes through a guarded
//! conditional update derived from the forward-only transition function in
//! [`crate::models::UploadStatus`], never a blind assignment, so concurrent
//! ingestion, progress, and finalization paths cannot lose updates.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::models::{truncate_error, Upload, UploadStatus};

/// Fetch an upload by id.
pub async fn fetch_upload(pool: &PgPool, upload_id: Uuid) -> Result<Option<Upload>> {
    sqlx::query_as::<_, Upload>("SELECT * FROM uploads WHERE id = $1")
        .bind(upload_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch upload")
}

/// Conditionally move an upload to `to`.
///
/// The update only applies when the current status admits the transition;
/// returns whether this caller performed it (false = a concurrent writer
/// got there first, or the upload is already terminal).
pub async fn transition_upload<'e, E>(executor: E, upload_id: Uuid, to: UploadStatus) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let allowed_from: Vec<UploadStatus> = [
        UploadStatus::Queued,
        UploadStatus::Parsing,
        UploadStatus::Validating,
        UploadStatus::Completed,
        UploadStatus::Failed,
    ]
    .into_iter()
    .filter(|from| from.can_transition_to(to))
    .collect();

    let updated = sqlx::query(
        r#"
        UPDATE uploads
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = ANY($3)
        "#,
    )
    .bind(upload_id)
    .bind(to)
    .bind(&allowed_from)
    .execute(executor)
    .await
    .context("Failed to transition upload status")?
    .rows_affected();

    Ok(updated > 0)
}

/// Fail an upload with a recorded error, unless it is already terminal.
///
/// Returns the updated row when this caller performed the transition.
pub async fn fail_upload(
    pool: &PgPool,
    upload_id: Uuid,
    error: &str,
) -> Result<Option<Upload>> {
    sqlx::query_as::<_, Upload>(
        r#"
        UPDATE uploads
        SET status = 'failed', last_error = $2, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        RETURNING *
        "#,
    )
    .bind(upload_id)
    .bind(truncate_error(error))
    .fetch_optional(pool)
    .await
    .context("Failed to mark upload as failed")
}

/// Whether any chunks exist for the upload (the ingestion idempotence guard).
pub async fn has_chunks(pool: &PgPool, upload_id: Uuid) -> Result<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE upload_id = $1)")
            .bind(upload_id)
            .fetch_one(pool)
            .await
            .context("Failed to check for existing chunks")?;

    Ok(exists)
}

/// Cumulative row counters across an upload's succeeded chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkTotals {
    pub processed_rows: i64,
    pub succeeded_rows: i64,
    pub failed_rows: i64,
}

pub async fn succeeded_chunk_totals(pool: &PgPool, upload_id: Uuid) -> Result<ChunkTotals> {
    let (processed, succeeded, failed): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(processed_rows), 0)::BIGINT,
               COALESCE(SUM(succeeded_rows), 0)::BIGINT,
               COALESCE(SUM(failed_rows), 0)::BIGINT
        FROM upload_chunks
        WHERE upload_id = $1 AND status = 'succeeded'
        "#,
    )
    .bind(upload_id)
    .fetch_one(pool)
    .await
    .context("Failed to sum chunk totals")?;

    Ok(ChunkTotals {
        processed_rows: processed,
        succeeded_rows: succeeded,
        failed_rows: failed,
    })
}

/// (completed, total) chunk counts for progress reporting.
pub async fn chunk_counts(pool: &PgPool, upload_id: Uuid) -> Result<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE status = 'succeeded')::BIGINT,
               COUNT(*)::BIGINT
        FROM upload_chunks
        WHERE upload_id = $1
        "#,
    )
    .bind(upload_id)
    .fetch_one(pool)
    .await
    .context("Failed to count chunks")?;

    Ok(counts)
}
