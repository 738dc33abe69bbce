//! # pg-table-sync
//!
//! Selective PostgreSQL-to-PostgreSQL table replication.
//!
//! Copies schema and row data of chosen tables from a source database into
//! a target database under per-table replication rules:
//!
//! - **schema** - reconcile table structure only (tables, sequences,
//!   primary keys, columns, indexes); no data motion
//! - **overwrite** - truncate the target table and reload it from source
//! - **upsert** - insert rows, updating on primary-key conflict
//! - **ignore** - insert rows, silently skipping unique-constraint conflicts
//!
//! A job executes on a single worker with sequential per-table processing
//! and produces a structured per-table result plus a time-ordered log
//! stream, both persisted through a pluggable [`JobStore`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_table_sync::{JobFile, JobSpec, MemoryJobStore, MigrationEngine};
//!
//! #[tokio::main]
//! async fn main() -> pg_table_sync::Result<()> {
//!     let job = JobFile::load("job.yaml")?;
//!
//!     let store = Arc::new(MemoryJobStore::new());
//!     store.insert_connection("source", job.source.clone());
//!     store.insert_connection("target", job.target.clone());
//!
//!     let spec = JobSpec {
//!         job_id: uuid::Uuid::new_v4().to_string(),
//!         source_connection_id: "source".into(),
//!         target_connection_id: "target".into(),
//!         global_rule: job.global_rule,
//!         tasks: job.tables,
//!     };
//!     store.create_job(&spec);
//!
//!     let record = MigrationEngine::new(store).run(&spec).await?;
//!     println!("{} tables processed", record.result.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod pool;
pub mod prepare;
pub mod replicate;
pub mod schema;
pub mod store;
pub mod typemap;

// Re-exports for convenient access
pub use config::{ConnectionSpec, JobFile, JobSpec, Rule, TableTask, TlsMode, TlsSpec};
pub use engine::MigrationEngine;
pub use error::{Result, SyncError};
pub use pool::DbPool;
pub use schema::SchemaChanges;
pub use store::{
    JobLogger, JobRecord, JobStatus, JobStore, JobUpdate, LogEvent, LogLevel, MemoryJobStore,
    PgJobStore, TableResult, TableStatus,
};
