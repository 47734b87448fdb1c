//! Domain types for upload processing
//!
//! Entities map 1:1 to the tables in `migrations/`; status enums map to the
//! Postgres ENUM types of the same name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Upload lifecycle status
///
/// Transitions only move forward; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Parsing,
    Validating,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Parsing => "parsing",
            UploadStatus::Validating => "validating",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    /// Display name used in status-changed notifications.
    pub fn display_name(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "Queued",
            UploadStatus::Parsing => "Parsing",
            UploadStatus::Validating => "Validating",
            UploadStatus::Completed => "Completed",
            UploadStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }

    /// Forward-only transition check.
    ///
    /// Re-entering the current non-terminal state is allowed so that a
    /// retried job can repeat its own transition; terminal states admit
    /// nothing.
    pub fn can_transition_to(&self, to: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, to) {
            (Queued, Parsing) | (Parsing, Parsing) => true,
            (Parsing, Validating) => true,
            (Validating, Completed) => true,
            (Queued | Parsing | Validating, Failed) => true,
            _ => false,
        }
    }
}

/// Shared status set for leasable work items (jobs and chunks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "work_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Queued => "queued",
            WorkStatus::Running => "running",
            WorkStatus::Succeeded => "succeeded",
            WorkStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ParseCsv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "row_validation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RowValidationStatus {
    Pending,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_scope", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Row,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Required,
    Regex,
    AllowedValues,
    DecimalRange,
    DateFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    Warning,
    Error,
}

impl RuleSeverity {
    pub fn is_error(&self) -> bool {
        matches!(self, RuleSeverity::Error)
    }
}

/// One submitted CSV file and its end-to-end lifecycle
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub token: Uuid,
    pub original_file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub content_sha256: String,
    pub raw_csv_bytes: Vec<u8>,
    pub status: UploadStatus,
    pub last_error: Option<String>,
    pub total_rows: Option<i32>,
    pub processed_rows: i32,
    pub succeeded_rows: i32,
    pub failed_rows: i32,
    pub headers: Option<Json<Vec<String>>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of ingestion work (parse one upload's CSV)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadJob {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub job_type: JobType,
    pub status: WorkStatus,
    pub attempt_count: i32,
    pub next_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous row-number range validated as one leasable unit
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadChunk {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub chunk_index: i32,
    pub row_start: i32,
    pub row_end: i32,
    pub status: WorkStatus,
    pub attempt_count: i32,
    pub next_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub processed_rows: i32,
    pub succeeded_rows: i32,
    pub failed_rows: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadChunk {
    /// Number of rows covered by this chunk (ranges are inclusive).
    pub fn row_count(&self) -> i32 {
        self.row_end - self.row_start + 1
    }
}

/// One parsed CSV data line, addressed by 1-based row_number
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadRow {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub row_number: i32,
    pub fields: Json<HashMap<String, Option<String>>>,
    pub validation_status: RowValidationStatus,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recorded rule violation for one row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadRowError {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub row_number: i32,
    pub field_name: Option<String>,
    pub code: String,
    pub message: String,
    pub severity: RuleSeverity,
    pub is_error: bool,
    pub rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A configured, toggleable validation check applied per row/field
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ValidationRule {
    pub id: Uuid,
    pub enabled: bool,
    pub scope: RuleScope,
    pub field_name: Option<String>,
    pub rule_type: RuleType,
    pub parameters: Json<serde_json::Value>,
    pub severity: RuleSeverity,
    pub code: String,
    pub message_template: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors stored on jobs, chunks and uploads are bounded columns.
pub const MAX_ERROR_LEN: usize = 2048;

/// Truncate an error message to fit its column.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
