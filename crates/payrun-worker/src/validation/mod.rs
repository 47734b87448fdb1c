//! Validation chunk processing
//!
//! Evaluates the enabled rule set against every row of a claimed chunk.
//! Row status updates and error records are committed in bounded batches;
//! each batch commit also refreshes the chunk's lease heartbeat, which is
//! what keeps a healthy chunk from being reclaimed as stale.

pub mod rules;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::db;
use crate::finalize;
use crate::ingest::csv::normalize_header;
use crate::lease::{LeaseCoordinator, WorkKind};
use crate::models::{
    RowValidationStatus, RuleScope, UploadChunk, UploadRow, ValidationRule,
};
use crate::notify::Notifier;
use rules::{CompiledRule, RuleFailure};

/// Runs claimed validation chunks.
pub struct ValidationRunner {
    pool: PgPool,
    notifier: Arc<Notifier>,
    progress_commit_rows: usize,
    progress_notify_rows: usize,
}

/// A row verdict waiting for the next batch commit.
struct PendingRow {
    row_id: Uuid,
    error_count: i32,
    status: RowValidationStatus,
}

/// An error record waiting for the next batch commit.
struct PendingError {
    row_number: i32,
    failure: RuleFailure,
}

impl ValidationRunner {
    pub fn new(
        pool: PgPool,
        notifier: Arc<Notifier>,
        progress_commit_rows: usize,
        progress_notify_rows: usize,
    ) -> Self {
        Self {
            pool,
            notifier,
            progress_commit_rows,
            progress_notify_rows,
        }
    }

    /// Process one claimed chunk to completion.
    ///
    /// The caller owns the lease: success is released here-after by the
    /// caller, errors go through [`ValidationRunner::handle_failure`].
    pub async fn run_chunk(&self, lease: &LeaseCoordinator, chunk: &UploadChunk) -> Result<()> {
        let started = Instant::now();

        let Some(upload) = db::fetch_upload(&self.pool, chunk.upload_id).await? else {
            bail!("Upload not found: {}", chunk.upload_id);
        };

        let compiled = self.load_rules().await?;
        let rows = self.load_rows(chunk).await?;

        let mut processed = 0i64;
        let mut succeeded = 0i64;
        let mut failed = 0i64;

        let mut pending_rows: Vec<PendingRow> = Vec::with_capacity(self.progress_commit_rows);
        let mut pending_errors: Vec<PendingError> = Vec::with_capacity(512);

        for row in &rows {
            processed += 1;

            let (error_count, failures) = evaluate_row(&compiled, row);

            let status = if error_count == 0 {
                succeeded += 1;
                RowValidationStatus::Valid
            } else {
                failed += 1;
                RowValidationStatus::Invalid
            };

            pending_rows.push(PendingRow {
                row_id: row.id,
                error_count,
                status,
            });
            pending_errors.extend(failures.into_iter().map(|failure| PendingError {
                row_number: row.row_number,
                failure,
            }));

            if pending_rows.len() >= self.progress_commit_rows {
                self.commit_progress(lease, chunk, &mut pending_rows, &mut pending_errors)
                    .await?;
            }

            if processed % self.progress_notify_rows as i64 == 0 {
                let totals = db::succeeded_chunk_totals(&self.pool, chunk.upload_id).await?;
                self.notifier
                    .row_progress(
                        upload.id,
                        upload.token,
                        chunk.chunk_index,
                        totals.processed_rows + processed,
                        totals.succeeded_rows + succeeded,
                    )
                    .await;
            }
        }

        self.commit_progress(lease, chunk, &mut pending_rows, &mut pending_errors)
            .await?;

        sqlx::query(
            r#"
            UPDATE upload_chunks
            SET processed_rows = $2, succeeded_rows = $3, failed_rows = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(chunk.id)
        .bind(processed as i32)
        .bind(succeeded as i32)
        .bind(failed as i32)
        .execute(&self.pool)
        .await
        .context("Failed to record chunk counters")?;

        lease
            .release_success(WorkKind::ValidationChunk, chunk.id)
            .await?;

        let totals = db::succeeded_chunk_totals(&self.pool, chunk.upload_id).await?;
        let (completed_chunks, total_chunks) = db::chunk_counts(&self.pool, chunk.upload_id).await?;
        self.notifier
            .chunk_completed(
                upload.id,
                upload.token,
                chunk.chunk_index,
                totals,
                total_chunks,
                completed_chunks,
            )
            .await;

        finalize::try_finalize(&self.pool, &self.notifier, chunk.upload_id).await?;

        tracing::info!(
            chunk_id = %chunk.id,
            upload_id = %chunk.upload_id,
            row_start = chunk.row_start,
            row_end = chunk.row_end,
            processed,
            succeeded,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunk validated"
        );

        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<CompiledRule>> {
        let rules = sqlx::query_as::<_, ValidationRule>(
            "SELECT * FROM validation_rules WHERE enabled",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load validation rules")?;

        Ok(rules::compile_rules(&rules))
    }

    async fn load_rows(&self, chunk: &UploadChunk) -> Result<Vec<UploadRow>> {
        sqlx::query_as::<_, UploadRow>(
            r#"
            SELECT * FROM upload_rows
            WHERE upload_id = $1 AND row_number >= $2 AND row_number <= $3
            ORDER BY row_number
            "#,
        )
        .bind(chunk.upload_id)
        .bind(chunk.row_start)
        .bind(chunk.row_end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load chunk rows")
    }

    /// Flush pending row verdicts and error records in one transaction,
    /// refreshing the chunk heartbeat on the way (the lease piggyback).
    async fn commit_progress(
        &self,
        lease: &LeaseCoordinator,
        chunk: &UploadChunk,
        pending_rows: &mut Vec<PendingRow>,
        pending_errors: &mut Vec<PendingError>,
    ) -> Result<()> {
        if pending_rows.is_empty() && pending_errors.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start progress transaction")?;

        for row in pending_rows.drain(..) {
            sqlx::query(
                r#"
                UPDATE upload_rows
                SET validation_status = $2, error_count = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(row.row_id)
            .bind(row.status)
            .bind(row.error_count)
            .execute(&mut *tx)
            .await
            .context("Failed to update row verdict")?;
        }

        for pending in pending_errors.drain(..) {
            let failure = pending.failure;
            sqlx::query(
                r#"
                INSERT INTO upload_row_errors
                    (id, upload_id, row_number, field_name, code, message, severity, is_error, rule_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(chunk.upload_id)
            .bind(pending.row_number)
            .bind(failure.field_name)
            .bind(failure.code)
            .bind(failure.message)
            .bind(failure.severity)
            .bind(failure.severity.is_error())
            .bind(failure.rule_id)
            .execute(&mut *tx)
            .await
            .context("Failed to insert row error")?;
        }

        lease
            .heartbeat(WorkKind::ValidationChunk, chunk.id, &mut *tx)
            .await?;

        tx.commit()
            .await
            .context("Failed to commit progress transaction")?;

        Ok(())
    }

    /// Route a failed chunk attempt through retry/backoff.
    ///
    /// A permanently failed chunk still counts towards finalization: the
    /// upload must resolve once its last open chunk reaches either terminal
    /// state.
    pub async fn handle_failure(
        &self,
        lease: &LeaseCoordinator,
        chunk: &UploadChunk,
        error: &anyhow::Error,
    ) -> Result<()> {
        tracing::error!(
            chunk_id = %chunk.id,
            upload_id = %chunk.upload_id,
            row_start = chunk.row_start,
            row_end = chunk.row_end,
            error = %error,
            "Chunk failed"
        );

        let message = format!("{error:#}");
        let outcome = lease
            .release_failure(WorkKind::ValidationChunk, chunk.id, &message)
            .await?;

        if let Some(upload) = db::fetch_upload(&self.pool, chunk.upload_id).await? {
            self.notifier
                .chunk_failed(
                    upload.id,
                    upload.token,
                    chunk.chunk_index,
                    &message,
                    outcome.attempt_count,
                    lease.max_attempts(),
                )
                .await;
        }

        if outcome.is_permanent() {
            finalize::try_finalize(&self.pool, &self.notifier, chunk.upload_id).await?;
        }

        Ok(())
    }
}

/// Evaluate the compiled rule set against one row.
///
/// Returns the Error-severity failure count (what classifies the row) and
/// every failure to record, warnings included.
fn evaluate_row(compiled: &[CompiledRule], row: &UploadRow) -> (i32, Vec<RuleFailure>) {
    let mut error_count = 0;
    let mut failures = Vec::new();

    for rule in compiled {
        let raw_value = match rule.scope {
            RuleScope::Field => rule
                .field_name
                .as_deref()
                .and_then(|name| lookup_field(&row.fields.0, name)),
            // Row scope is a strict narrowing of field scope: same
            // evaluation, no field lookup.
            RuleScope::Row => None,
        };

        for failure in rules::evaluate(rule, raw_value) {
            if failure.is_error() {
                error_count += 1;
            }
            failures.push(failure);
        }
    }

    (error_count, failures)
}

/// Case-insensitive field lookup by normalized header name.
fn lookup_field<'a>(fields: &'a HashMap<String, Option<String>>, name: &str) -> Option<&'a str> {
    let key = normalize_header(name);
    if let Some(value) = fields.get(&key) {
        return value.as_deref();
    }
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        .and_then(|(_, value)| value.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleSeverity, RuleType};
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    fn row_with(fields: &[(&str, Option<&str>)]) -> UploadRow {
        UploadRow {
            id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            row_number: 1,
            fields: Json(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                    .collect(),
            ),
            validation_status: RowValidationStatus::Pending,
            error_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn compiled(
        scope: RuleScope,
        field_name: Option<&str>,
        rule_type: RuleType,
        severity: RuleSeverity,
        parameters: serde_json::Value,
    ) -> CompiledRule {
        let rule = ValidationRule {
            id: Uuid::new_v4(),
            enabled: true,
            scope,
            field_name: field_name.map(str::to_string),
            rule_type,
            parameters: Json(parameters),
            severity,
            code: "CODE".to_string(),
            message_template: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        rules::compile_rule(&rule).expect("rule should compile")
    }

    #[test]
    fn test_evaluate_row_counts_only_error_severity() {
        let checks = vec![
            compiled(
                RuleScope::Field,
                Some("Amount"),
                RuleType::Required,
                RuleSeverity::Error,
                json!({}),
            ),
            compiled(
                RuleScope::Field,
                Some("Reference"),
                RuleType::Required,
                RuleSeverity::Warning,
                json!({}),
            ),
        ];

        let row = row_with(&[("Amount", Some("")), ("Reference", Some(""))]);
        let (error_count, failures) = evaluate_row(&checks, &row);

        // both failures are recorded, only the Error one classifies
        assert_eq!(failures.len(), 2);
        assert_eq!(error_count, 1);
    }

    #[test]
    fn test_evaluate_row_field_lookup_is_case_insensitive() {
        let checks = vec![compiled(
            RuleScope::Field,
            Some("amount"),
            RuleType::Required,
            RuleSeverity::Error,
            json!({}),
        )];

        let row = row_with(&[("Amount", Some("10.00"))]);
        let (error_count, failures) = evaluate_row(&checks, &row);

        assert_eq!(error_count, 0);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_evaluate_row_scope_skips_field_lookup() {
        let checks = vec![compiled(
            RuleScope::Row,
            None,
            RuleType::Required,
            RuleSeverity::Error,
            json!({}),
        )];

        // value present in the map is irrelevant to a row-scoped rule
        let row = row_with(&[("Amount", Some("10.00"))]);
        let (error_count, failures) = evaluate_row(&checks, &row);

        assert_eq!(error_count, 1);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_lookup_field_missing_cell() {
        let row = row_with(&[("Amount", None)]);
        assert_eq!(lookup_field(&row.fields.0, "Amount"), None);
        assert_eq!(lookup_field(&row.fields.0, "Nope"), None);
    }
}
