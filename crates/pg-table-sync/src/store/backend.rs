//! Job store trait.
//!
//! The engine depends on three operations: connection lookup, job record
//! updates, and log appends. Implementations decide where those live -
//! see [`super::PgJobStore`] for the database layout and
//! [`super::MemoryJobStore`] for an in-process store.

use async_trait::async_trait;

use super::{JobStatus, JobUpdate, LogEvent};
use crate::config::ConnectionSpec;
use crate::error::{Result, SyncError};

/// Persistence contract between the engine and its caller.
///
/// Implementations must be `Send + Sync`; the engine holds them behind
/// `Arc<dyn JobStore>`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up a connection descriptor by id.
    async fn load_connection(&self, id: &str) -> Result<Option<ConnectionSpec>>;

    /// Apply a partial update to a job record.
    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<()>;

    /// Append one event to the job log stream.
    ///
    /// The engine treats this as best-effort and swallows failures.
    async fn append_log(&self, event: LogEvent) -> Result<()>;
}

/// String form of a job status, as persisted.
pub fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

/// Parse a persisted job status.
pub fn str_to_job_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        _ => Err(SyncError::Config(format!("Invalid job status: {}", s))),
    }
}

/// String form of a log level, as persisted.
pub fn log_level_to_str(level: super::LogLevel) -> &'static str {
    match level {
        super::LogLevel::Info => "info",
        super::LogLevel::Warning => "warning",
        super::LogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LogLevel;

    #[test]
    fn test_job_status_roundtrip() {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ];

        for status in statuses {
            let s = job_status_to_str(status);
            let parsed = str_to_job_status(s).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_invalid_job_status() {
        assert!(str_to_job_status("cancelled").is_err());
    }

    #[test]
    fn test_log_level_strings() {
        assert_eq!(log_level_to_str(LogLevel::Info), "info");
        assert_eq!(log_level_to_str(LogLevel::Warning), "warning");
        assert_eq!(log_level_to_str(LogLevel::Error), "error");
    }
}
