//! Worker poll loop
//!
//! One single-threaded loop per process: each iteration reclaims stale
//! leases, attempts one ingestion job, attempts one validation chunk, and
//! sleeps when neither lane had work. All cross-worker coordination lives
//! in the database; the loop holds no shared in-memory state.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::ingest::IngestionRunner;
use crate::lease::{LeaseCoordinator, WorkKind};
use crate::notify::Notifier;
use crate::validation::ValidationRunner;

pub struct Worker {
    lease: LeaseCoordinator,
    ingestion: IngestionRunner,
    validation: ValidationRunner,
    poll_delay: Duration,
    error_cooldown: Duration,
    worker_id: String,
}

impl Worker {
    pub fn new(pool: PgPool, notifier: Arc<Notifier>, config: &Config) -> Self {
        let worker = &config.worker;

        Self {
            lease: LeaseCoordinator::new(
                pool.clone(),
                worker.worker_id.clone(),
                worker.stale_lock_secs,
                worker.max_attempts,
                worker.retry_base_secs,
            ),
            ingestion: IngestionRunner::new(
                pool.clone(),
                notifier.clone(),
                worker.insert_batch_rows,
                worker.chunk_size_rows,
            ),
            validation: ValidationRunner::new(
                pool,
                notifier,
                worker.progress_commit_rows,
                worker.progress_notify_rows,
            ),
            poll_delay: Duration::from_millis(worker.poll_delay_ms),
            error_cooldown: Duration::from_millis(worker.error_cooldown_ms),
            worker_id: worker.worker_id.clone(),
        }
    }

    /// Run until the shutdown signal flips.
    ///
    /// Shutdown is checked between iterations only, never mid-item, so a
    /// stop request lets the current job or chunk finish; anything a
    /// killed process leaves running is reclaimed by surviving workers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(worker_id = %self.worker_id, "Validation worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(true) => {},
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_delay) => {},
                        _ = shutdown.changed() => {},
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "Worker loop error");
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_cooldown) => {},
                        _ = shutdown.changed() => {},
                    }
                },
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Validation worker stopped");
        Ok(())
    }

    /// One poll iteration; returns whether any work was performed.
    async fn run_once(&self) -> Result<bool> {
        let mut did_work = false;

        self.lease.reclaim_stale(WorkKind::IngestionJob).await?;
        if let Some(job) = self.lease.claim_next_job().await? {
            tracing::info!(job_id = %job.id, upload_id = %job.upload_id, "Processing parse job");

            match self.ingestion.run_job(&self.lease, &job).await {
                Ok(()) => {
                    self.lease
                        .release_success(WorkKind::IngestionJob, job.id)
                        .await?;
                },
                Err(e) => {
                    self.ingestion
                        .handle_failure(&self.lease, &job, &e)
                        .await?;
                },
            }
            did_work = true;
        }

        self.lease.reclaim_stale(WorkKind::ValidationChunk).await?;
        if let Some(chunk) = self.lease.claim_next_chunk().await? {
            tracing::info!(
                chunk_id = %chunk.id,
                upload_id = %chunk.upload_id,
                row_start = chunk.row_start,
                row_end = chunk.row_end,
                "Processing chunk"
            );

            match self.validation.run_chunk(&self.lease, &chunk).await {
                Ok(()) => {},
                Err(e) => {
                    self.validation
                        .handle_failure(&self.lease, &chunk, &e)
                        .await?;
                },
            }
            did_work = true;
        }

        Ok(did_work)
    }
}
