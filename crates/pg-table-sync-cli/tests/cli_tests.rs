//! CLI integration tests for pg-table-sync.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the pg-table-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("pg-table-sync").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_help_shows_global_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("--verbosity"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-table-sync"));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_missing_job_file() {
    cmd()
        .args(["--config", "/nonexistent/job.yaml", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_job_file_exits_with_config_code() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(b"source: {host: ''}\n").unwrap();
    file.flush().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_same_database_rejected() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(
        br#"
source:
  host: localhost
  port: 5432
  database: app
  user: postgres
  password: pw
target:
  host: localhost
  port: 5432
  database: app
  user: postgres
  password: pw
tables:
  - name: users
"#,
    )
    .unwrap();
    file.flush().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("same database"));
}

#[test]
fn test_invalid_verbosity_rejected() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(
        br#"
source:
  host: src
  database: app
  user: postgres
  password: pw
target:
  host: dst
  database: app
  user: postgres
  password: pw
tables:
  - name: users
"#,
    )
    .unwrap();
    file.flush().unwrap();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--verbosity",
            "loud",
            "run",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid verbosity"));
}
