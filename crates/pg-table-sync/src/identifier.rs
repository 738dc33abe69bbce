//! Centralized identifier validation and quoting.
//!
//! SQL identifiers (table names, column names, sequence names) cannot be
//! passed as parameters in prepared statements - only data values can be
//! parameterized. Every identifier spliced into SQL therefore goes through
//! this module first.
//!
//! Table and column names received from callers are held to a stricter
//! standard than names read back from the catalog: caller-supplied names
//! must match `[A-Za-z_][A-Za-z0-9_]*`, while catalog-derived names only
//! need to survive quoting.

use crate::error::{Result, SyncError};

/// Maximum identifier length (PostgreSQL truncates at 63 bytes).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier read back from the catalog.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate a caller-supplied replication identifier.
///
/// Must match `[A-Za-z_][A-Za-z0-9_]*` in addition to the general rules.
pub fn validate_replication_identifier(name: &str) -> Result<()> {
    validate_identifier(name)?;

    let mut chars = name.chars();
    let first = chars.next().unwrap();
    let head_ok = first.is_ascii_alphabetic() || first == '_';
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !head_ok || !tail_ok {
        return Err(SyncError::Config(format!(
            "Invalid replication identifier {:?}: must match [A-Za-z_][A-Za-z0-9_]*",
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote an identifier that has already been validated.
///
/// Used on hot paths where the caller holds names that went through
/// [`validate_identifier`] at introspection time.
pub fn quote_unchecked(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
