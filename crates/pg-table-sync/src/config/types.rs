//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plaintext connection.
    Disable,
    /// Always negotiate TLS.
    #[default]
    Require,
    /// Negotiate TLS when the server offers it.
    Prefer,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TlsMode::Disable => "disable",
            TlsMode::Require => "require",
            TlsMode::Prefer => "prefer",
        };
        f.write_str(s)
    }
}

/// TLS block of a connection descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSpec {
    /// Master switch; when false the mode is ignored.
    #[serde(default)]
    pub enabled: bool,

    /// Negotiation mode.
    #[serde(default)]
    pub mode: TlsMode,

    /// Verify the server certificate against the system roots.
    #[serde(default)]
    pub verify_peer: bool,
}

/// A database connection descriptor.
///
/// Opaque to the engine; supplied by the caller through the job store.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// TLS settings.
    #[serde(default)]
    pub tls: TlsSpec,
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Per-table replication rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rule {
    /// Reconcile table structure only; no data motion.
    Schema,
    /// Truncate the target and reload from source.
    #[default]
    Overwrite,
    /// Insert rows, updating on primary-key conflict.
    Upsert,
    /// Insert rows, silently skipping unique-constraint conflicts.
    Ignore,
}

impl Rule {
    /// Wire name of the rule.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Schema => "schema",
            Rule::Overwrite => "overwrite",
            Rule::Upsert => "upsert",
            Rule::Ignore => "ignore",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(Rule::Schema),
            "overwrite" => Some(Rule::Overwrite),
            "upsert" => Some(Rule::Upsert),
            "ignore" => Some(Rule::Ignore),
            _ => None,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One table to replicate, with an optional rule override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableTask {
    /// Table name in the `public` schema.
    #[serde(alias = "name")]
    pub table_name: String,

    /// Rule for this table; falls back to the job's global rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
}

impl TableTask {
    /// The rule in effect for this task.
    pub fn effective_rule(&self, global: Rule) -> Rule {
        self.rule.unwrap_or(global)
    }
}

/// A replication job: connection references plus an ordered table list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Stable, externally generated job identifier.
    pub job_id: String,

    /// Source connection id in the job store.
    pub source_connection_id: String,

    /// Target connection id in the job store.
    pub target_connection_id: String,

    /// Default rule for tasks without an override.
    #[serde(default)]
    pub global_rule: Rule,

    /// Tables to replicate, in execution order.
    pub tasks: Vec<TableTask>,
}

/// Self-contained job description loaded from a file (CLI entry point).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    /// Source database.
    pub source: ConnectionSpec,

    /// Target database.
    pub target: ConnectionSpec,

    /// Default rule for tables without an override.
    #[serde(default)]
    pub global_rule: Rule,

    /// Tables to replicate, in order.
    pub tables: Vec<TableTask>,
}

fn default_pg_port() -> u16 {
    5432
}
