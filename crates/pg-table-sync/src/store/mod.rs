//! Job records, per-table results, and the log stream.
//!
//! The engine is authoritative for the terminal transition of a job record;
//! everything here is written through the [`JobStore`] trait so callers can
//! bring their own persistence.

pub mod backend;
pub mod db;
pub mod memory;

pub use backend::JobStore;
pub use db::PgJobStore;
pub use memory::MemoryJobStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Rule;

/// Job lifecycle status. Transitions are monotonic:
/// `pending -> running -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Outcome of one table task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Failed,
}

/// Log severity for the job log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Result of one table task, in task order inside the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub table: String,
    pub rule: Rule,

    /// Rows moved; for the `schema` rule, the number of columns added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_migrated: Option<u64>,

    pub status: TableStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A migration job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub source_connection_id: String,
    pub target_connection_id: String,
    pub status: JobStatus,
    pub global_rule: Rule,

    /// One entry per task, in task order; empty until terminal.
    #[serde(default)]
    pub result: Vec<TableResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to a job record.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<Vec<TableResult>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// One entry of the time-ordered job log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_id: String,

    /// Table the event concerns; absent for job-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,

    pub level: LogLevel,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

/// Job-scoped sink for structured log events.
///
/// Append failures are swallowed: a broken log channel never blocks data
/// motion. Every event is mirrored to `tracing` for operator diagnostics.
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<dyn JobStore>,
    job_id: String,
}

impl JobLogger {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    pub async fn info(&self, table: &str, message: impl Into<String>) {
        self.append(table, LogLevel::Info, message.into()).await;
    }

    pub async fn warning(&self, table: &str, message: impl Into<String>) {
        self.append(table, LogLevel::Warning, message.into()).await;
    }

    pub async fn error(&self, table: &str, message: impl Into<String>) {
        self.append(table, LogLevel::Error, message.into()).await;
    }

    async fn append(&self, table: &str, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!(table, "{}", message),
            LogLevel::Warning => tracing::warn!(table, "{}", message),
            LogLevel::Error => tracing::error!(table, "{}", message),
        }

        let event = LogEvent {
            job_id: self.job_id.clone(),
            table_name: (!table.is_empty()).then(|| table.to_string()),
            level,
            message,
            metadata: None,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.append_log(event).await {
            warn!("Dropping job log event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_result_json_shape() {
        let result = TableResult {
            table: "users".to_string(),
            rule: Rule::Overwrite,
            rows_migrated: Some(2),
            status: TableStatus::Success,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["table"], "users");
        assert_eq!(json["rule"], "overwrite");
        assert_eq!(json["rows_migrated"], 2);
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_table_result_carries_error() {
        let result = TableResult {
            table: "bad".to_string(),
            rule: Rule::Overwrite,
            rows_migrated: None,
            status: TableStatus::Failed,
            error: Some("table not found in source".to_string()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "table not found in source");
        assert!(json.get("rows_migrated").is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(JobStatus::Running).unwrap(),
            serde_json::json!("running")
        );
        assert_eq!(
            serde_json::to_value(LogLevel::Warning).unwrap(),
            serde_json::json!("warning")
        );
    }
}
