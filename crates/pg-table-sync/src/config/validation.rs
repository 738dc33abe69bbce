//! Job file validation.

use super::JobFile;
use crate::error::{Result, SyncError};
use crate::identifier::validate_replication_identifier;

/// Validate a job file.
pub fn validate(job: &JobFile) -> Result<()> {
    for (side, conn) in [("source", &job.source), ("target", &job.target)] {
        if conn.host.is_empty() {
            return Err(SyncError::Config(format!("{side}.host is required")));
        }
        if conn.database.is_empty() {
            return Err(SyncError::Config(format!("{side}.database is required")));
        }
        if conn.user.is_empty() {
            return Err(SyncError::Config(format!("{side}.user is required")));
        }
    }

    // Cannot replicate a database onto itself
    if job.source.host == job.target.host
        && job.source.port == job.target.port
        && job.source.database == job.target.database
    {
        return Err(SyncError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    if job.tables.is_empty() {
        return Err(SyncError::Config("tables must list at least one table".into()));
    }

    for task in &job.tables {
        validate_replication_identifier(&task.table_name)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSpec, Rule, TableTask, TlsSpec};

    fn conn(host: &str, port: u16, db: &str) -> ConnectionSpec {
        ConnectionSpec {
            host: host.to_string(),
            port,
            database: db.to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            tls: TlsSpec::default(),
        }
    }

    fn valid_job() -> JobFile {
        JobFile {
            source: conn("src.example.com", 5432, "app"),
            target: conn("dst.example.com", 5432, "app"),
            global_rule: Rule::Overwrite,
            tables: vec![TableTask {
                table_name: "users".to_string(),
                rule: None,
            }],
        }
    }

    #[test]
    fn test_valid_job() {
        assert!(validate(&valid_job()).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut job = valid_job();
        job.source.host = String::new();
        assert!(validate(&job).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut job = valid_job();
        job.target = job.source.clone();
        assert!(validate(&job).is_err());
    }

    #[test]
    fn test_empty_table_list_rejected() {
        let mut job = valid_job();
        job.tables.clear();
        assert!(validate(&job).is_err());
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let mut job = valid_job();
        job.tables[0].table_name = "users; DROP TABLE x".to_string();
        assert!(validate(&job).is_err());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut c = conn("h", 5432, "db");
        c.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", c);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
