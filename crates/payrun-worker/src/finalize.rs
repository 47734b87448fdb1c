//! Upload finalization
//!
//! Runs after any chunk reaches a terminal state. Aggregates counters
//! across all chunks once none remain open and resolves the upload's
//! terminal status. Two chunks finishing at nearly the same instant can
//! both observe zero open chunks; the terminal write is a conditional
//! update guarded on the upload not already being terminal, so the first
//! writer wins and the second is a no-op. That gives exactly one terminal
//! transition and exactly one terminal notification.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Upload, WorkStatus};
use crate::notify::Notifier;

/// Per-chunk outcome snapshot used to resolve the upload.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ChunkOutcome {
    pub status: WorkStatus,
    pub processed_rows: i32,
    pub succeeded_rows: i32,
    pub failed_rows: i32,
}

/// Aggregated terminal result for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    pub any_chunk_failed: bool,
    pub processed_rows: i32,
    pub succeeded_rows: i32,
    pub failed_rows: i32,
}

/// Resolve the upload outcome from its chunk outcomes.
///
/// `None` while any chunk is still queued or running. Counters are summed
/// across every chunk regardless of terminal outcome.
pub fn resolve_outcome(chunks: &[ChunkOutcome]) -> Option<UploadOutcome> {
    if chunks
        .iter()
        .any(|c| matches!(c.status, WorkStatus::Queued | WorkStatus::Running))
    {
        return None;
    }

    Some(UploadOutcome {
        any_chunk_failed: chunks.iter().any(|c| c.status == WorkStatus::Failed),
        processed_rows: chunks.iter().map(|c| c.processed_rows).sum(),
        succeeded_rows: chunks.iter().map(|c| c.succeeded_rows).sum(),
        failed_rows: chunks.iter().map(|c| c.failed_rows).sum(),
    })
}

/// Finalize the upload if every chunk has reached a terminal state.
///
/// Safe to call from any chunk completion in any order; losing the
/// first-writer race makes this a no-op.
pub async fn try_finalize(pool: &PgPool, notifier: &Notifier, upload_id: Uuid) -> Result<()> {
    let chunks = sqlx::query_as::<_, ChunkOutcome>(
        "SELECT status, processed_rows, succeeded_rows, failed_rows FROM upload_chunks WHERE upload_id = $1",
    )
    .bind(upload_id)
    .fetch_all(pool)
    .await
    .context("Failed to load chunk outcomes")?;

    let Some(outcome) = resolve_outcome(&chunks) else {
        return Ok(());
    };

    let terminal = if outcome.any_chunk_failed {
        "failed"
    } else {
        "completed"
    };

    // First writer wins; rows_affected = 0 means another worker already
    // finalized (or the upload failed through the job path).
    let finalized = sqlx::query_as::<_, Upload>(
        r#"
        UPDATE uploads
        SET status = $2::upload_status,
            processed_rows = $3,
            succeeded_rows = $4,
            failed_rows = $5,
            updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        RETURNING *
        "#,
    )
    .bind(upload_id)
    .bind(terminal)
    .bind(outcome.processed_rows)
    .bind(outcome.succeeded_rows)
    .bind(outcome.failed_rows)
    .fetch_optional(pool)
    .await
    .context("Failed to finalize upload")?;

    let Some(upload) = finalized else {
        return Ok(());
    };

    if outcome.any_chunk_failed {
        let error = upload
            .last_error
            .as_deref()
            .unwrap_or("One or more chunks failed");
        notifier.upload_failed(upload.id, upload.token, error).await;
    } else {
        notifier
            .upload_completed(
                upload.id,
                upload.token,
                upload.total_rows.unwrap_or(0),
                upload.processed_rows,
                upload.succeeded_rows,
                upload.failed_rows,
            )
            .await;
    }

    tracing::info!(
        upload_id = %upload_id,
        status = terminal,
        processed = outcome.processed_rows,
        succeeded = outcome.succeeded_rows,
        failed = outcome.failed_rows,
        "Upload finalized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(status: WorkStatus, processed: i32, succeeded: i32, failed: i32) -> ChunkOutcome {
        ChunkOutcome {
            status,
            processed_rows: processed,
            succeeded_rows: succeeded,
            failed_rows: failed,
        }
    }

    #[test]
    fn test_no_outcome_while_chunks_open() {
        let chunks = vec![
            chunk(WorkStatus::Succeeded, 100, 90, 10),
            chunk(WorkStatus::Queued, 0, 0, 0),
        ];
        assert_eq!(resolve_outcome(&chunks), None);

        let chunks = vec![
            chunk(WorkStatus::Succeeded, 100, 90, 10),
            chunk(WorkStatus::Running, 50, 50, 0),
        ];
        assert_eq!(resolve_outcome(&chunks), None);
    }

    #[test]
    fn test_all_succeeded_completes_with_exact_sums() {
        let chunks = vec![
            chunk(WorkStatus::Succeeded, 1000, 990, 10),
            chunk(WorkStatus::Succeeded, 1000, 1000, 0),
            chunk(WorkStatus::Succeeded, 500, 499, 1),
        ];

        let outcome = resolve_outcome(&chunks).unwrap();
        assert!(!outcome.any_chunk_failed);
        assert_eq!(outcome.processed_rows, 2500);
        assert_eq!(outcome.succeeded_rows, 2489);
        assert_eq!(outcome.failed_rows, 11);
    }

    #[test]
    fn test_any_failed_chunk_fails_upload_but_still_sums_all() {
        let chunks = vec![
            chunk(WorkStatus::Succeeded, 1000, 990, 10),
            chunk(WorkStatus::Succeeded, 1000, 1000, 0),
            chunk(WorkStatus::Failed, 200, 150, 50),
        ];

        let outcome = resolve_outcome(&chunks).unwrap();
        assert!(outcome.any_chunk_failed);
        // failed chunks contribute their partial counters too
        assert_eq!(outcome.processed_rows, 2200);
        assert_eq!(outcome.succeeded_rows, 2140);
        assert_eq!(outcome.failed_rows, 60);
    }

    #[test]
    fn test_no_chunks_resolves_empty_completed() {
        // zero-chunk uploads never reach finalization in practice (zero
        // data lines fail at parse), but the fold stays total
        let outcome = resolve_outcome(&[]).unwrap();
        assert!(!outcome.any_chunk_failed);
        assert_eq!(outcome.processed_rows, 0);
    }
}
