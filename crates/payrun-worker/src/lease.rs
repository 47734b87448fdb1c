//! Lease coordination for jobs and chunks
//!
//! Both work tables carry the same lease columns (status, attempt_count,
//! next_run_at, locked_at/locked_by/heartbeat_at, last_error), so the
//! claim/reclaim/release protocol is written once and parameterized by
//! [`WorkKind`].
//!
//! The claim is a single SQL statement: a CTE selects one eligible row with
//! `FOR UPDATE SKIP LOCKED` and the enclosing UPDATE transitions it to
//! running while stamping the lease. Contested rows are skipped rather than
//! waited on, and the select-plus-transition commits as one atomic unit, so
//! a queued item is never handed to two claimants.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::models::{UploadChunk, UploadJob, WorkStatus};

/// The two leasable work-item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    IngestionJob,
    ValidationChunk,
}

impl WorkKind {
    fn table(&self) -> &'static str {
        match self {
            WorkKind::IngestionJob => "upload_jobs",
            WorkKind::ValidationChunk => "upload_chunks",
        }
    }

    /// Extra claim eligibility predicate.
    fn claim_filter(&self) -> &'static str {
        match self {
            WorkKind::IngestionJob => " AND job_type = 'parse_csv'",
            WorkKind::ValidationChunk => "",
        }
    }

    /// Claim order: oldest-due job first; chunks grouped per upload.
    fn claim_order(&self) -> &'static str {
        match self {
            WorkKind::IngestionJob => "next_run_at",
            WorkKind::ValidationChunk => "upload_id, chunk_index",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::IngestionJob => "job",
            WorkKind::ValidationChunk => "chunk",
        }
    }
}

/// Outcome of a failure release.
#[derive(Debug, Clone, Copy)]
pub struct FailureOutcome {
    pub attempt_count: i32,
    pub status: WorkStatus,
}

impl FailureOutcome {
    pub fn is_permanent(&self) -> bool {
        self.status == WorkStatus::Failed
    }
}

/// Claim/heartbeat/release protocol over the two work tables.
pub struct LeaseCoordinator {
    pool: PgPool,
    worker_id: String,
    stale_lock_secs: i64,
    max_attempts: i32,
    retry_base_secs: f64,
}

impl LeaseCoordinator {
    pub fn new(
        pool: PgPool,
        worker_id: String,
        stale_lock_secs: i64,
        max_attempts: i32,
        retry_base_secs: f64,
    ) -> Self {
        Self {
            pool,
            worker_id,
            stale_lock_secs,
            max_attempts,
            retry_base_secs,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Claim one eligible ingestion job, if any.
    pub async fn claim_next_job(&self) -> Result<Option<UploadJob>> {
        let sql = claim_sql(WorkKind::IngestionJob);
        sqlx::query_as::<_, UploadJob>(&sql)
            .bind(&self.worker_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim ingestion job")
    }

    /// Claim one eligible validation chunk, if any.
    pub async fn claim_next_chunk(&self) -> Result<Option<UploadChunk>> {
        let sql = claim_sql(WorkKind::ValidationChunk);
        sqlx::query_as::<_, UploadChunk>(&sql)
            .bind(&self.worker_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim validation chunk")
    }

    /// Requeue running items whose heartbeat exceeded the stale threshold.
    ///
    /// Recovers work abandoned by crashed or hung workers; returns the
    /// number of items reclaimed.
    pub async fn reclaim_stale(&self, kind: WorkKind) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                heartbeat_at = NULL,
                next_run_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND heartbeat_at IS NOT NULL
              AND heartbeat_at < NOW() - make_interval(secs => $1)
            "#,
            table = kind.table()
        );

        let reclaimed = sqlx::query(&sql)
            .bind(self.stale_lock_secs as f64)
            .execute(&self.pool)
            .await
            .context("Failed to reclaim stale work items")?
            .rows_affected();

        if reclaimed > 0 {
            tracing::warn!(
                kind = kind.as_str(),
                count = reclaimed,
                "Re-queued stale work items"
            );
        }

        Ok(reclaimed)
    }

    /// Refresh a lease heartbeat as part of a caller-owned transaction.
    ///
    /// Progress commits during chunk processing call this so no separate
    /// renewal transaction is needed.
    pub async fn heartbeat<'e, E>(&self, kind: WorkKind, id: Uuid, executor: E) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "UPDATE {table} SET heartbeat_at = NOW() WHERE id = $1",
            table = kind.table()
        );
        sqlx::query(&sql)
            .bind(id)
            .execute(executor)
            .await
            .context("Failed to refresh heartbeat")?;
        Ok(())
    }

    /// Release a lease after successful processing.
    pub async fn release_success(&self, kind: WorkKind, id: Uuid) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'succeeded',
                locked_at = NULL,
                locked_by = NULL,
                heartbeat_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
            table = kind.table()
        );

        sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to release work item")?;

        Ok(())
    }

    /// Release a lease after a failed attempt.
    ///
    /// Increments attempt_count and either requeues with exponential backoff
    /// (`next_run_at = now + base * 2^attempt_count`, uncapped, no jitter)
    /// or marks the item permanently failed once max_attempts is reached.
    pub async fn release_failure(
        &self,
        kind: WorkKind,
        id: Uuid,
        error: &str,
    ) -> Result<FailureOutcome> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET attempt_count = attempt_count + 1,
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL,
                heartbeat_at = NULL,
                status = CASE
                    WHEN attempt_count + 1 >= $3 THEN 'failed'::work_status
                    ELSE 'queued'::work_status
                END,
                next_run_at = CASE
                    WHEN attempt_count + 1 >= $3 THEN next_run_at
                    ELSE NOW() + make_interval(secs => $4 * power(2::float8, attempt_count + 1))
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING attempt_count, status
            "#,
            table = kind.table()
        );

        let (attempt_count, status) = sqlx::query_as::<_, (i32, WorkStatus)>(&sql)
            .bind(id)
            .bind(crate::models::truncate_error(error))
            .bind(self.max_attempts)
            .bind(self.retry_base_secs)
            .fetch_one(&self.pool)
            .await
            .context("Failed to record work item failure")?;

        let outcome = FailureOutcome {
            attempt_count,
            status,
        };

        if outcome.is_permanent() {
            tracing::error!(
                kind = kind.as_str(),
                id = %id,
                error = %error,
                "Work item failed after max attempts"
            );
        } else {
            tracing::warn!(
                kind = kind.as_str(),
                id = %id,
                attempt_count,
                max_attempts = self.max_attempts,
                retry_in_secs = backoff_delay_secs(self.retry_base_secs, attempt_count),
                error = %error,
                "Work item failed, will retry"
            );
        }

        Ok(outcome)
    }
}

/// Backoff delay for a failed attempt: `base * 2^attempt`.
pub fn backoff_delay_secs(base_secs: f64, attempt_count: i32) -> f64 {
    base_secs * 2f64.powi(attempt_count)
}

fn claim_sql(kind: WorkKind) -> String {
    format!(
        r#"
        WITH candidate AS (
            SELECT id
            FROM {table}
            WHERE status = 'queued'
              AND next_run_at <= NOW(){filter}
            ORDER BY {order}
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE {table} AS w
        SET status = 'running',
            locked_at = NOW(),
            locked_by = $1,
            heartbeat_at = NOW(),
            updated_at = NOW()
        FROM candidate
        WHERE w.id = candidate.id
        RETURNING w.*
        "#,
        table = kind.table(),
        filter = kind.claim_filter(),
        order = kind.claim_order()
    )
}
