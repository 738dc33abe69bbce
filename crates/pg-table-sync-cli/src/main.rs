//! pg-table-sync CLI - selective PostgreSQL table replication.

use clap::{Parser, Subcommand};
use pg_table_sync::{
    DbPool, JobFile, JobSpec, JobStatus, MemoryJobStore, MigrationEngine, SyncError, TableStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "pg-table-sync")]
#[command(about = "Selective PostgreSQL to PostgreSQL table replication")]
#[command(version)]
struct Cli {
    /// Path to the YAML job file
    #[arg(short, long, default_value = "job.yaml")]
    config: PathBuf,

    /// Output the JSON job record to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replication job
    Run,

    /// Test source and target connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SyncError::Config)?;

    let job = JobFile::load(&cli.config)?;
    info!("Loaded job file from {:?}", cli.config);

    match cli.command {
        Commands::HealthCheck => {
            DbPool::connect(&job.source, "source").await?.close();
            DbPool::connect(&job.target, "target").await?.close();
            info!("Source and target connections OK");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run => {
            let store = Arc::new(MemoryJobStore::new());
            store.insert_connection("source", job.source.clone());
            store.insert_connection("target", job.target.clone());

            let spec = JobSpec {
                job_id: uuid::Uuid::new_v4().to_string(),
                source_connection_id: "source".to_string(),
                target_connection_id: "target".to_string(),
                global_rule: job.global_rule,
                tasks: job.tables.clone(),
            };
            store.create_job(&spec);

            let engine = MigrationEngine::new(store);
            let record = engine.run(&spec).await?;

            let succeeded = record
                .result
                .iter()
                .filter(|r| r.status == TableStatus::Success)
                .count();
            let failed = record.result.len() - succeeded;
            info!(
                "Job {}: {} tables succeeded, {} failed, {} ms",
                record.id,
                succeeded,
                failed,
                record.duration_ms.unwrap_or(0)
            );

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }

            if record.status == JobStatus::Completed && failed == 0 {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("Invalid verbosity: {}", other)),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => return Err(format!("Invalid log format: {}", other)),
    }

    Ok(())
}
