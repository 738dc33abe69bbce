//! In-memory job store.
//!
//! Backs tests and the CLI's file-driven mode, where connections come from
//! the job file rather than a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{JobRecord, JobStatus, JobStore, JobUpdate, LogEvent};
use crate::config::{ConnectionSpec, JobSpec};
use crate::error::{Result, SyncError};

#[derive(Default)]
struct Inner {
    connections: HashMap<String, ConnectionSpec>,
    jobs: HashMap<String, JobRecord>,
    logs: Vec<LogEvent>,
}

/// In-process job store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection descriptor under an id.
    pub fn insert_connection(&self, id: impl Into<String>, spec: ConnectionSpec) {
        self.inner
            .lock()
            .unwrap()
            .connections
            .insert(id.into(), spec);
    }

    /// Create a job record in `running` state from a job spec.
    pub fn create_job(&self, spec: &JobSpec) -> JobRecord {
        let now = Utc::now();
        let record = JobRecord {
            id: spec.job_id.clone(),
            source_connection_id: spec.source_connection_id.clone(),
            target_connection_id: spec.target_connection_id.clone(),
            status: JobStatus::Running,
            global_rule: spec.global_rule,
            result: Vec::new(),
            duration_ms: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .lock()
            .unwrap()
            .jobs
            .insert(record.id.clone(), record.clone());
        record
    }

    /// Fetch a job record.
    pub fn get_job(&self, id: &str) -> Option<JobRecord> {
        self.inner.lock().unwrap().jobs.get(id).cloned()
    }

    /// All appended log events, in append order.
    pub fn logs(&self) -> Vec<LogEvent> {
        self.inner.lock().unwrap().logs.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_connection(&self, id: &str) -> Result<Option<ConnectionSpec>> {
        Ok(self.inner.lock().unwrap().connections.get(id).cloned())
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(format!("job {}", id)))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(result) = update.result {
            record.result = result;
        }
        if let Some(duration_ms) = update.duration_ms {
            record.duration_ms = Some(duration_ms);
        }
        if let Some(error_message) = update.error_message {
            record.error_message = Some(error_message);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(&self, event: LogEvent) -> Result<()> {
        self.inner.lock().unwrap().logs.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rule, TableTask, TlsSpec};
    use crate::store::LogLevel;

    fn spec() -> JobSpec {
        JobSpec {
            job_id: "job-1".to_string(),
            source_connection_id: "src".to_string(),
            target_connection_id: "dst".to_string(),
            global_rule: Rule::Overwrite,
            tasks: vec![TableTask {
                table_name: "users".to_string(),
                rule: None,
            }],
        }
    }

    fn conn() -> ConnectionSpec {
        ConnectionSpec {
            host: "localhost".to_string(),
            port: 5432,
            database: "db".to_string(),
            user: "postgres".to_string(),
            password: "pw".to_string(),
            tls: TlsSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_connection_roundtrip() {
        let store = MemoryJobStore::new();
        store.insert_connection("src", conn());

        let loaded = store.load_connection("src").await.unwrap();
        assert!(loaded.is_some());
        assert!(store.load_connection("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_update_applies_fields() {
        let store = MemoryJobStore::new();
        let record = store.create_job(&spec());
        assert_eq!(record.status, JobStatus::Running);

        store
            .update_job(
                "job-1",
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    result: None,
                    duration_ms: Some(12),
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let record = store.get_job("job-1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.duration_ms, Some(12));
    }

    #[tokio::test]
    async fn test_update_unknown_job_fails() {
        let store = MemoryJobStore::new();
        let result = store.update_job("missing", JobUpdate::default()).await;
        assert!(matches!(result.unwrap_err(), SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_logs_preserve_append_order() {
        let store = MemoryJobStore::new();
        for i in 0..3 {
            store
                .append_log(LogEvent {
                    job_id: "job-1".to_string(),
                    table_name: Some("users".to_string()),
                    level: LogLevel::Info,
                    message: format!("event {}", i),
                    metadata: None,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }

        let logs = store.logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "event 0");
        assert_eq!(logs[2].message, "event 2");
    }
}
