//! Migration engine - drives one replication job.
//!
//! A job runs on a single logical worker with sequential per-table
//! processing; a server may run many jobs in parallel by starting one
//! engine call per job. One table's failure never aborts the job - only
//! failures before the per-table loop (connection lookup, pool opening)
//! are job-fatal.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::catalog;
use crate::config::{JobSpec, Rule};
use crate::error::Result;
use crate::identifier;
use crate::pool::DbPool;
use crate::replicate;
use crate::schema;
use crate::store::{
    JobLogger, JobRecord, JobStatus, JobStore, JobUpdate, TableResult, TableStatus,
};

/// Drives replication jobs against a job store.
pub struct MigrationEngine {
    store: Arc<dyn JobStore>,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Run a job to its terminal state.
    ///
    /// The returned record carries the per-table results in task order. The
    /// same record is written through the job store; only that final write
    /// can fail this function.
    pub async fn run(&self, spec: &JobSpec) -> Result<JobRecord> {
        let started = Instant::now();
        let logger = JobLogger::new(self.store.clone(), &spec.job_id);

        info!("Starting job {} with {} tables", spec.job_id, spec.tasks.len());

        let source_spec = match self.store.load_connection(&spec.source_connection_id).await {
            Ok(found) => found,
            Err(e) => {
                return self
                    .finish(spec, started, JobStatus::Failed, Vec::new(), Some(e.to_string()))
                    .await;
            }
        };
        let target_spec = match self.store.load_connection(&spec.target_connection_id).await {
            Ok(found) => found,
            Err(e) => {
                return self
                    .finish(spec, started, JobStatus::Failed, Vec::new(), Some(e.to_string()))
                    .await;
            }
        };
        let (source_spec, target_spec) = match (source_spec, target_spec) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return self
                    .finish(spec, started, JobStatus::Failed, Vec::new(), Some(
                        "Source or target connection not found".to_string(),
                    ))
                    .await;
            }
        };

        let source_pool = match DbPool::connect(&source_spec, "source").await {
            Ok(pool) => pool,
            Err(e) => {
                return self
                    .finish(spec, started, JobStatus::Failed, Vec::new(), Some(e.to_string()))
                    .await;
            }
        };
        let target_pool = match DbPool::connect(&target_spec, "target").await {
            Ok(pool) => pool,
            Err(e) => {
                source_pool.close();
                return self
                    .finish(spec, started, JobStatus::Failed, Vec::new(), Some(e.to_string()))
                    .await;
            }
        };

        let results = self
            .run_tables(spec, &source_pool, &target_pool, &logger)
            .await;

        source_pool.close();
        target_pool.close();

        self.finish(spec, started, JobStatus::Completed, results, None)
            .await
    }

    /// Per-table loop with failure isolation.
    async fn run_tables(
        &self,
        spec: &JobSpec,
        source_pool: &DbPool,
        target_pool: &DbPool,
        logger: &JobLogger,
    ) -> Vec<TableResult> {
        let mut results = Vec::with_capacity(spec.tasks.len());

        for task in &spec.tasks {
            let rule = task.effective_rule(spec.global_rule);
            let table = task.table_name.as_str();

            logger
                .info(table, format!("Starting migration with rule: {}", rule))
                .await;

            match self
                .run_table(source_pool, target_pool, table, rule, logger)
                .await
            {
                Ok(rows) => {
                    logger
                        .info(table, format!("Finished: {} rows migrated", rows))
                        .await;
                    results.push(TableResult {
                        table: table.to_string(),
                        rule,
                        rows_migrated: Some(rows),
                        status: TableStatus::Success,
                        error: None,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    logger.error(table, message.clone()).await;
                    results.push(TableResult {
                        table: table.to_string(),
                        rule,
                        rows_migrated: None,
                        status: TableStatus::Failed,
                        error: Some(message),
                    });
                }
            }
        }

        results
    }

    /// Run one table task. Any error here fails the table, not the job.
    async fn run_table(
        &self,
        source_pool: &DbPool,
        target_pool: &DbPool,
        table: &str,
        rule: Rule,
        logger: &JobLogger,
    ) -> Result<u64> {
        identifier::validate_replication_identifier(table)?;

        let source = source_pool.get().await?;
        let target = target_pool.get().await?;

        let cols = catalog::columns(&source, table).await?;
        let (json_cols, array_cols) = catalog::classify_columns(&cols);
        logger
            .info(
                table,
                format!(
                    "JSON columns: {:?}, array columns: {:?}",
                    sorted(&json_cols),
                    sorted(&array_cols)
                ),
            )
            .await;

        match rule {
            Rule::Schema => {
                let changes = schema::replay(&source, &target, table, &cols, logger).await?;
                for error in &changes.errors {
                    logger.warning(table, error.clone()).await;
                }
                Ok(changes.columns_added.len() as u64)
            }
            Rule::Overwrite => replicate::overwrite(&source, &target, table, &cols, logger).await,
            Rule::Upsert => replicate::upsert(&source, &target, table, &cols, logger).await,
            Rule::Ignore => replicate::insert_ignore(&source, &target, table, &cols, logger).await,
        }
    }

    /// Write the terminal state and build the returned record.
    async fn finish(
        &self,
        spec: &JobSpec,
        started: Instant,
        status: JobStatus,
        results: Vec<TableResult>,
        error_message: Option<String>,
    ) -> Result<JobRecord> {
        let duration_ms = started.elapsed().as_millis() as i64;

        self.store
            .update_job(
                &spec.job_id,
                JobUpdate {
                    status: Some(status),
                    result: Some(results.clone()),
                    duration_ms: Some(duration_ms),
                    error_message: error_message.clone(),
                },
            )
            .await?;

        info!(
            "Job {} finished with status {:?} in {} ms",
            spec.job_id, status, duration_ms
        );

        let now = Utc::now();
        Ok(JobRecord {
            id: spec.job_id.clone(),
            source_connection_id: spec.source_connection_id.clone(),
            target_connection_id: spec.target_connection_id.clone(),
            status,
            global_rule: spec.global_rule,
            result: results,
            duration_ms: Some(duration_ms),
            error_message,
            created_at: now,
            updated_at: now,
        })
    }
}

fn sorted(set: &std::collections::HashSet<String>) -> Vec<&String> {
    let mut v: Vec<&String> = set.iter().collect();
    v.sort();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSpec, TableTask, TlsSpec};
    use crate::store::MemoryJobStore;

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

    #[tokio::test]
    async fn test_missing_connection_fails_job_before_any_table() {
        let store = Arc::new(MemoryJobStore::new());
        store.create_job(&spec());

        let engine = MigrationEngine::new(store.clone());
        let record = engine.run(&spec()).await.unwrap();

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Source or target connection not found")
        );
        assert!(record.result.is_empty());
        assert!(record.duration_ms.is_some());

        // Terminal state was written through the store.
        let stored = store.get_job("job-1").unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    /// Store whose connection lookups fail while record writes still work.
    struct BrokenLookupStore {
        inner: MemoryJobStore,
    }

    #[async_trait::async_trait]
    impl crate::store::JobStore for BrokenLookupStore {
        async fn load_connection(
            &self,
            _id: &str,
        ) -> crate::error::Result<Option<ConnectionSpec>> {
            Err(crate::error::SyncError::pool(
                "connection pool exhausted",
                "loading connection",
            ))
        }

        async fn update_job(&self, id: &str, update: crate::store::JobUpdate) -> crate::error::Result<()> {
            self.inner.update_job(id, update).await
        }

        async fn append_log(&self, event: crate::store::LogEvent) -> crate::error::Result<()> {
            self.inner.append_log(event).await
        }
    }

    #[tokio::test]
    async fn test_store_lookup_error_still_writes_terminal_record() {
        let store = Arc::new(BrokenLookupStore {
            inner: MemoryJobStore::new(),
        });
        store.inner.create_job(&spec());

        let engine = MigrationEngine::new(store.clone());
        let record = engine.run(&spec()).await.unwrap();

        assert_eq!(record.status, JobStatus::Failed);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection pool exhausted"));
        assert!(record.result.is_empty());

        // The failure was routed through the terminal write, not thrown.
        let stored = store.inner.get_job("job-1").unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection pool exhausted"));
    }

    #[tokio::test]
    async fn test_one_missing_connection_is_still_fatal() {
        let store = Arc::new(MemoryJobStore::new());
        store.create_job(&spec());
        store.insert_connection(
            "src",
            ConnectionSpec {
                host: "localhost".to_string(),
                port: 5432,
                database: "db".to_string(),
                user: "postgres".to_string(),
                password: "pw".to_string(),
                tls: TlsSpec::default(),
            },
        );

        let engine = MigrationEngine::new(store.clone());
        let record = engine.run(&spec()).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Source or target connection not found")
        );
    }
}
