//! CSV ingestion job processing
//!
//! Turns a claimed parse job into persisted rows and queued validation
//! chunks: parse the upload's raw bytes, stage rows in bounded batches,
//! then record totals, flip the upload to validating and insert the chunk
//! plan in one transaction, so "chunks exist" always means planning
//! completed.

pub mod csv;
pub mod planner;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db;
use crate::lease::{LeaseCoordinator, WorkKind};
use crate::models::{Upload, UploadJob, UploadStatus};
use crate::notify::Notifier;

/// Runs claimed ingestion jobs.
pub struct IngestionRunner {
    pool: PgPool,
    notifier: Arc<Notifier>,
    insert_batch_rows: usize,
    chunk_size_rows: i32,
}

impl IngestionRunner {
    pub fn new(
        pool: PgPool,
        notifier: Arc<Notifier>,
        insert_batch_rows: usize,
        chunk_size_rows: i32,
    ) -> Self {
        Self {
            pool,
            notifier,
            insert_batch_rows,
            chunk_size_rows,
        }
    }

    /// Process one claimed parse job to completion.
    ///
    /// The caller owns the lease: it releases success when this returns Ok
    /// and routes errors through [`IngestionRunner::handle_failure`]. Each
    /// row batch commit refreshes the job heartbeat so a long parse is not
    /// reclaimed as stale mid-run.
    pub async fn run_job(&self, lease: &LeaseCoordinator, job: &UploadJob) -> Result<()> {
        let started = Instant::now();

        let Some(upload) = db::fetch_upload(&self.pool, job.upload_id).await? else {
            bail!("Upload not found: {}", job.upload_id);
        };

        db::transition_upload(&self.pool, upload.id, UploadStatus::Parsing).await?;
        self.notifier
            .upload_status_changed(upload.id, upload.token, "Parsing", None, None)
            .await;

        // Chunks already present means a previous attempt got all the way
        // through planning; re-running the job is a no-op success.
        if db::has_chunks(&self.pool, upload.id).await? {
            tracing::info!(upload_id = %upload.id, "Upload already parsed, skipping");
            return Ok(());
        }

        csv::verify_content_sha256(&upload.raw_csv_bytes, &upload.content_sha256)?;
        let parsed = csv::parse_csv(&upload.raw_csv_bytes)?;
        let total_rows = parsed.rows.len() as i32;

        self.insert_rows(lease, job, &upload, &parsed).await?;

        let chunk_count = self.plan_and_activate(&upload, &parsed.headers, total_rows).await?;

        self.notifier
            .upload_status_changed(
                upload.id,
                upload.token,
                "Validating",
                Some(total_rows),
                Some(chunk_count),
            )
            .await;

        tracing::info!(
            upload_id = %upload.id,
            total_rows,
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upload parsed"
        );

        Ok(())
    }

    /// Stage parsed rows in bounded batches, one transaction per batch.
    ///
    /// `ON CONFLICT DO NOTHING` on (upload_id, row_number) makes a re-run
    /// after a crash mid-staging idempotent.
    async fn insert_rows(
        &self,
        lease: &LeaseCoordinator,
        job: &UploadJob,
        upload: &Upload,
        parsed: &csv::ParsedCsv,
    ) -> Result<()> {
        for (batch_index, batch) in parsed.rows.chunks(self.insert_batch_rows).enumerate() {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to start row insert transaction")?;

            let base_row_number = (batch_index * self.insert_batch_rows) as i32;
            for (offset, fields) in batch.iter().enumerate() {
                let row_number = base_row_number + offset as i32 + 1;

                sqlx::query(
                    r#"
                    INSERT INTO upload_rows (id, upload_id, row_number, fields, validation_status)
                    VALUES ($1, $2, $3, $4, 'pending')
                    ON CONFLICT (upload_id, row_number) DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(upload.id)
                .bind(row_number)
                .bind(sqlx::types::Json(fields))
                .execute(&mut *tx)
                .await
                .context("Failed to insert upload row")?;
            }

            lease
                .heartbeat(WorkKind::IngestionJob, job.id, &mut *tx)
                .await?;

            tx.commit()
                .await
                .context("Failed to commit row insert transaction")?;
        }

        Ok(())
    }

    /// Record totals and headers, flip the upload to validating, and insert
    /// the chunk plan, all in one transaction.
    async fn plan_and_activate(
        &self,
        upload: &Upload,
        headers: &[String],
        total_rows: i32,
    ) -> Result<i32> {
        let ranges = planner::plan_chunks(total_rows, self.chunk_size_rows);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start chunk planning transaction")?;

        sqlx::query(
            r#"
            UPDATE uploads
            SET total_rows = $2, headers = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(upload.id)
        .bind(total_rows)
        .bind(sqlx::types::Json(headers))
        .execute(&mut *tx)
        .await
        .context("Failed to record upload totals")?;

        let moved =
            db::transition_upload(&mut *tx, upload.id, UploadStatus::Validating).await?;
        if !moved {
            // A concurrent writer (terminal failure elsewhere) took the
            // upload out of parsing; planning must not resurrect it.
            bail!("Upload {} left the parsing state mid-ingestion", upload.id);
        }

        for (chunk_index, (row_start, row_end)) in ranges.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO upload_chunks (id, upload_id, chunk_index, row_start, row_end, status, next_run_at)
                VALUES ($1, $2, $3, $4, $5, 'queued', NOW())
                ON CONFLICT (upload_id, chunk_index) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(upload.id)
            .bind(chunk_index as i32)
            .bind(row_start)
            .bind(row_end)
            .execute(&mut *tx)
            .await
            .context("Failed to insert chunk")?;
        }

        tx.commit()
            .await
            .context("Failed to commit chunk planning transaction")?;

        Ok(ranges.len() as i32)
    }

    /// Route a failed job attempt through retry/backoff.
    ///
    /// Exhausting the attempt budget is what fails the upload itself and
    /// raises the upload-failed event.
    pub async fn handle_failure(
        &self,
        lease: &LeaseCoordinator,
        job: &UploadJob,
        error: &anyhow::Error,
    ) -> Result<()> {
        tracing::error!(job_id = %job.id, upload_id = %job.upload_id, error = %error, "Parse job failed");

        let message = format!("{error:#}");
        let outcome = lease
            .release_failure(WorkKind::IngestionJob, job.id, &message)
            .await?;

        if outcome.is_permanent() {
            if let Some(upload) = db::fail_upload(&self.pool, job.upload_id, &message).await? {
                self.notifier
                    .upload_failed(upload.id, upload.token, &message)
                    .await;
            }
        }

        Ok(())
    }
}
