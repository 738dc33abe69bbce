//! Database-backed job store.
//!
//! Persists connection descriptors, migration job records, and the job log
//! stream in three tables (`connections`, `migrations`, `migration_logs`).
//! Task lists and results are stored as JSON text so the record survives
//! schema evolution of the result shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;

use super::backend::{job_status_to_str, log_level_to_str, str_to_job_status};
use super::{JobRecord, JobStatus, JobStore, JobUpdate, LogEvent, TableResult};
use crate::config::{ConnectionSpec, JobSpec, Rule, TlsMode, TlsSpec};
use crate::error::{Result, SyncError};
use crate::identifier::{quote_unchecked, validate_replication_identifier};

/// Job store persisted in a PostgreSQL database.
pub struct PgJobStore {
    pool: Pool,
    schema: String,
}

impl PgJobStore {
    /// Create a store over an existing pool, using the `public` schema.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            schema: "public".to_string(),
        }
    }

    /// Use a dedicated schema instead of `public`.
    ///
    /// The name is an identifier spliced into every store statement and is
    /// held to the same standard as caller-supplied table names.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_replication_identifier(&schema)?;
        self.schema = schema;
        Ok(self)
    }

    /// Schema-qualified table name, quoted for splicing.
    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_unchecked(&self.schema), table)
    }

    /// Create the store tables. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "initializing job store schema"))?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_unchecked(&self.schema)),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    host TEXT NOT NULL,
                    port INTEGER NOT NULL,
                    database TEXT NOT NULL,
                    username TEXT NOT NULL,
                    password TEXT NOT NULL,
                    ssl BOOLEAN NOT NULL DEFAULT false,
                    ssl_mode TEXT NOT NULL DEFAULT 'require',
                    verify_peer BOOLEAN NOT NULL DEFAULT false,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.qualified("connections")
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    source_connection_id TEXT NOT NULL,
                    target_connection_id TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('pending', 'running', 'completed', 'failed')),
                    global_rule TEXT NOT NULL,
                    collections TEXT NOT NULL,
                    result TEXT,
                    duration_ms BIGINT,
                    error_message TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.qualified("migrations")
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    migration_id TEXT NOT NULL,
                    collection_name TEXT,
                    level TEXT NOT NULL CHECK (level IN ('info', 'warning', 'error')),
                    message TEXT NOT NULL,
                    metadata TEXT,
                    timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.qualified("migration_logs")
            ),
            &[],
        )
        .await?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_migration_logs_stream
                    ON {}(migration_id, timestamp)",
                self.qualified("migration_logs")
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    /// Insert or replace a connection descriptor.
    pub async fn create_connection(
        &self,
        id: &str,
        name: &str,
        spec: &ConnectionSpec,
    ) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "saving connection"))?;

        conn.execute(
            &format!(
                "INSERT INTO {}
                 (id, name, host, port, database, username, password, ssl, ssl_mode, verify_peer)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    host = EXCLUDED.host,
                    port = EXCLUDED.port,
                    database = EXCLUDED.database,
                    username = EXCLUDED.username,
                    password = EXCLUDED.password,
                    ssl = EXCLUDED.ssl,
                    ssl_mode = EXCLUDED.ssl_mode,
                    verify_peer = EXCLUDED.verify_peer,
                    updated_at = NOW()",
                self.qualified("connections")
            ),
            &[
                &id,
                &name,
                &spec.host,
                &(spec.port as i32),
                &spec.database,
                &spec.user,
                &spec.password,
                &spec.tls.enabled,
                &tls_mode_to_str(spec.tls.mode),
                &spec.tls.verify_peer,
            ],
        )
        .await?;

        Ok(())
    }

    /// Create a job record in `running` state.
    pub async fn create_job(&self, spec: &JobSpec) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "creating job record"))?;

        let collections = serde_json::to_string(&spec.tasks)?;

        conn.execute(
            &format!(
                "INSERT INTO {}
                 (id, source_connection_id, target_connection_id, status, global_rule, collections)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                self.qualified("migrations")
            ),
            &[
                &spec.job_id,
                &spec.source_connection_id,
                &spec.target_connection_id,
                &job_status_to_str(JobStatus::Running),
                &spec.global_rule.as_str(),
                &collections,
            ],
        )
        .await?;

        Ok(())
    }

    /// Fetch a job record.
    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "loading job record"))?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT id, source_connection_id, target_connection_id, status,
                            global_rule, result, duration_ms, error_message,
                            created_at, updated_at
                     FROM {}
                     WHERE id = $1",
                    self.qualified("migrations")
                ),
                &[&id],
            )
            .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let status: String = row.get(3);
        let rule: String = row.get(4);
        let result_json: Option<String> = row.get(5);
        let result: Vec<TableResult> = match result_json {
            Some(text) => serde_json::from_str(&text)?,
            None => Vec::new(),
        };

        Ok(Some(JobRecord {
            id: row.get(0),
            source_connection_id: row.get(1),
            target_connection_id: row.get(2),
            status: str_to_job_status(&status)?,
            global_rule: Rule::parse(&rule)
                .ok_or_else(|| SyncError::Config(format!("Invalid rule: {}", rule)))?,
            result,
            duration_ms: row.get(6),
            error_message: row.get(7),
            created_at: row.get::<_, DateTime<Utc>>(8),
            updated_at: row.get::<_, DateTime<Utc>>(9),
        }))
    }

    /// Fetch a job's log stream in time order.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<LogEvent>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "loading job logs"))?;

        let rows = conn
            .query(
                &format!(
                    "SELECT migration_id, collection_name, level, message, metadata, timestamp
                     FROM {}
                     WHERE migration_id = $1
                     ORDER BY timestamp, id",
                    self.qualified("migration_logs")
                ),
                &[&id],
            )
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let level: String = row.get(2);
            let metadata: Option<String> = row.get(4);
            events.push(LogEvent {
                job_id: row.get(0),
                table_name: row.get(1),
                level: match level.as_str() {
                    "info" => super::LogLevel::Info,
                    "warning" => super::LogLevel::Warning,
                    "error" => super::LogLevel::Error,
                    other => {
                        return Err(SyncError::Config(format!("Invalid log level: {}", other)))
                    }
                },
                message: row.get(3),
                metadata: metadata.and_then(|m| serde_json::from_str::<Value>(&m).ok()),
                timestamp: row.get::<_, DateTime<Utc>>(5),
            });
        }

        Ok(events)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn load_connection(&self, id: &str) -> Result<Option<ConnectionSpec>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "loading connection"))?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT host, port, database, username, password, ssl, ssl_mode, verify_peer
                     FROM {}
                     WHERE id = $1",
                    self.qualified("connections")
                ),
                &[&id],
            )
            .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let ssl_mode: String = row.get(6);
        Ok(Some(ConnectionSpec {
            host: row.get(0),
            port: row.get::<_, i32>(1) as u16,
            database: row.get(2),
            user: row.get(3),
            password: row.get(4),
            tls: TlsSpec {
                enabled: row.get(5),
                mode: str_to_tls_mode(&ssl_mode)?,
                verify_peer: row.get(7),
            },
        }))
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "updating job record"))?;

        let status = update.status.map(job_status_to_str);
        let result = match &update.result {
            Some(r) => Some(serde_json::to_string(r)?),
            None => None,
        };

        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET
                        status = COALESCE($2, status),
                        result = COALESCE($3, result),
                        duration_ms = COALESCE($4, duration_ms),
                        error_message = COALESCE($5, error_message),
                        updated_at = NOW()
                     WHERE id = $1",
                    self.qualified("migrations")
                ),
                &[&id, &status, &result, &update.duration_ms, &update.error_message],
            )
            .await?;

        if updated == 0 {
            return Err(SyncError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn append_log(&self, event: LogEvent) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "appending job log"))?;

        let metadata = match &event.metadata {
            Some(m) => Some(serde_json::to_string(m)?),
            None => None,
        };

        conn.execute(
            &format!(
                "INSERT INTO {}
                 (migration_id, collection_name, level, message, metadata, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                self.qualified("migration_logs")
            ),
            &[
                &event.job_id,
                &event.table_name,
                &log_level_to_str(event.level),
                &event.message,
                &metadata,
                &event.timestamp,
            ],
        )
        .await?;

        Ok(())
    }
}

fn tls_mode_to_str(mode: TlsMode) -> &'static str {
    match mode {
        TlsMode::Disable => "disable",
        TlsMode::Require => "require",
        TlsMode::Prefer => "prefer",
    }
}

fn str_to_tls_mode(s: &str) -> Result<TlsMode> {
    match s {
        "disable" => Ok(TlsMode::Disable),
        "require" => Ok(TlsMode::Require),
        "prefer" => Ok(TlsMode::Prefer),
        _ => Err(SyncError::Config(format!("Invalid ssl_mode: {}", s))),
    }
}
