//! Schema replay: reproduce a source table on the target, non-destructively.
//!
//! Sequence creation, table creation, and sequence ownership are split into
//! separate steps so that `nextval` defaults never reference an object that
//! does not exist yet. Columns are only ever added on the target; reruns are
//! safe.

use tokio_postgres::Client;
use tracing::debug;

use crate::catalog::{self, ColumnDescriptor, SequenceDescriptor};
use crate::error::Result;
use crate::identifier::{quote_unchecked, validate_identifier};
use crate::store::JobLogger;
use crate::typemap;

/// What a schema replay changed on the target.
#[derive(Debug, Clone, Default)]
pub struct SchemaChanges {
    pub table_created: bool,
    pub sequences_created: usize,
    pub columns_added: Vec<String>,
    /// Column- and index-level failures; never fatal for the table.
    pub errors: Vec<String>,
}

/// Replay a source table's structure onto the target.
///
/// `cols` are the already-introspected source columns; an empty slice means
/// the table does not exist in the source.
pub async fn replay(
    source: &Client,
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    logger: &JobLogger,
) -> Result<SchemaChanges> {
    let mut changes = SchemaChanges::default();

    if cols.is_empty() {
        logger.info(table, "table not found in source").await;
        return Ok(changes);
    }

    let sequences = catalog::sequences(source, table).await?;

    if !catalog::table_exists(target, table).await? {
        create_table(source, target, table, cols, &sequences, &mut changes, logger).await?;
        if !changes.table_created {
            return Ok(changes);
        }
    } else {
        add_missing_columns(target, table, cols, &sequences, &mut changes, logger).await?;
    }

    sync_indexes(source, target, table, &mut changes).await?;

    Ok(changes)
}

async fn create_table(
    source: &Client,
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    sequences: &[SequenceDescriptor],
    changes: &mut SchemaChanges,
    logger: &JobLogger,
) -> Result<()> {
    for seq in sequences {
        if ensure_sequence(target, seq).await? {
            changes.sequences_created += 1;
        }
    }

    // Authoritative PK first; serial columns approximate it when the source
    // declares none.
    let mut pk = catalog::primary_key(source, table).await?;
    if pk.is_empty() {
        pk = cols
            .iter()
            .filter(|c| c.has_sequence_default())
            .map(|c| c.name.clone())
            .collect();
    }

    let ddl = create_table_sql(table, cols, &pk);
    if let Err(e) = target.batch_execute(&ddl).await {
        changes.errors.push(format!("create table failed: {}", e));
        return Ok(());
    }
    changes.table_created = true;
    logger.info(table, "created table on target").await;

    // Wire sequence defaults and ownership now that both objects exist.
    for col in cols.iter().filter(|c| c.has_sequence_default()) {
        let default = col.column_default.as_deref().unwrap_or_default();
        let seq_name = match sequence_name_from_default(default) {
            Some(name) => name,
            None => {
                changes
                    .errors
                    .push(format!("column {}: unparsable default {:?}", col.name, default));
                continue;
            }
        };
        if let Err(e) = validate_identifier(&seq_name) {
            changes.errors.push(format!("column {}: {}", col.name, e));
            continue;
        }

        let own = format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT nextval('{}'::regclass);
             ALTER SEQUENCE {} OWNED BY {}.{}",
            quote_unchecked(table),
            quote_unchecked(&col.name),
            quote_unchecked(&seq_name),
            quote_unchecked(&seq_name),
            quote_unchecked(table),
            quote_unchecked(&col.name),
        );
        if let Err(e) = target.batch_execute(&own).await {
            changes
                .errors
                .push(format!("column {}: sequence ownership failed: {}", col.name, e));
        }
    }

    Ok(())
}

async fn add_missing_columns(
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    sequences: &[SequenceDescriptor],
    changes: &mut SchemaChanges,
    logger: &JobLogger,
) -> Result<()> {
    let target_cols = catalog::columns(target, table).await?;

    for col in cols {
        if target_cols.iter().any(|t| t.name == col.name) {
            continue;
        }

        if col.has_sequence_default() {
            if let Some(seq) = sequences.iter().find(|s| s.column == col.name) {
                match ensure_sequence(target, seq).await {
                    Ok(true) => changes.sequences_created += 1,
                    Ok(false) => {}
                    Err(e) => {
                        changes
                            .errors
                            .push(format!("column {}: sequence creation failed: {}", col.name, e));
                        continue;
                    }
                }
            }
        }

        let sql = add_column_sql(table, col);
        match target.batch_execute(&sql).await {
            Ok(()) => {
                changes.columns_added.push(col.name.clone());
                logger
                    .info(table, format!("added column {}", col.name))
                    .await;
            }
            Err(e) => {
                changes
                    .errors
                    .push(format!("column {}: add failed: {}", col.name, e));
            }
        }
    }

    Ok(())
}

/// Replay source index definitions missing from the target, by name.
async fn sync_indexes(
    source: &Client,
    target: &Client,
    table: &str,
    changes: &mut SchemaChanges,
) -> Result<()> {
    let source_indexes = catalog::indexes(source, table).await?;
    if source_indexes.is_empty() {
        return Ok(());
    }
    let target_indexes = catalog::indexes(target, table).await?;

    for idx in source_indexes {
        if target_indexes.iter().any(|t| t.name == idx.name) {
            continue;
        }
        debug!("Replaying index {} on {}", idx.name, table);
        if let Err(e) = target.batch_execute(&idx.definition).await {
            changes
                .errors
                .push(format!("index {}: replay failed: {}", idx.name, e));
        }
    }

    Ok(())
}

/// Create a sequence if missing. Returns true when it was created.
async fn ensure_sequence(target: &Client, seq: &SequenceDescriptor) -> Result<bool> {
    let exists = target
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.sequences
                WHERE sequence_schema = 'public' AND sequence_name = $1
            )",
            &[&seq.name],
        )
        .await?
        .get::<_, bool>(0);

    if exists {
        return Ok(false);
    }

    target
        .batch_execute(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {} INCREMENT BY {} MINVALUE {} START WITH {}",
            quote_unchecked(&seq.name),
            seq.increment,
            seq.minimum_value,
            seq.start_value
        ))
        .await?;
    Ok(true)
}

/// Extract the sequence name from a `nextval(...)` column default.
///
/// Takes the quoted first argument, drops any `::regclass` suffix, takes the
/// last dotted component, and strips quotes:
/// `nextval('public."Orders_id_seq"'::regclass)` -> `Orders_id_seq`.
pub fn sequence_name_from_default(default: &str) -> Option<String> {
    let start = default.find("nextval(")? + "nextval(".len();
    let rest = &default[start..];
    let open = rest.find('\'')?;
    let close = rest[open + 1..].find('\'')?;
    let inner = &rest[open + 1..open + 1 + close];

    let last = inner.rsplit('.').next()?;
    let name = last.trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Render the `CREATE TABLE` statement for a set of source columns.
pub fn create_table_sql(table: &str, cols: &[ColumnDescriptor], pk: &[String]) -> String {
    let mut defs: Vec<String> = cols.iter().map(column_def).collect();

    if !pk.is_empty() {
        let pk_cols: Vec<String> = pk.iter().map(|c| quote_unchecked(c)).collect();
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_unchecked(&format!("{}_pkey", table)),
            pk_cols.join(", ")
        ));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_unchecked(table),
        defs.join(",\n    ")
    )
}

/// Render one column definition for `CREATE TABLE`.
///
/// `nextval` defaults are omitted here; they are applied after sequence
/// ownership is established.
fn column_def(col: &ColumnDescriptor) -> String {
    let mut def = format!("{} {}", quote_unchecked(&col.name), typemap::map_column_type(col));

    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }

    if let Some(default) = &col.column_default {
        if !col.has_sequence_default() {
            def.push_str(&format!(" DEFAULT {}", default));
        }
    }

    def
}

/// Render the `ADD COLUMN` statement for an incremental schema run.
///
/// A `NOT NULL` column without a source default gets a synthetic default
/// from the null-fill table so existing target rows remain valid.
pub fn add_column_sql(table: &str, col: &ColumnDescriptor) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_unchecked(table),
        quote_unchecked(&col.name),
        typemap::map_column_type(col)
    );

    match &col.column_default {
        Some(default) => sql.push_str(&format!(" DEFAULT {}", default)),
        None => {
            if !col.is_nullable {
                if let Some(fill) = typemap::null_fill_default(col) {
                    sql.push_str(&format!(" DEFAULT {}", fill));
                }
            }
        }
    }

    if !col.is_nullable {
        sql.push_str(" NOT NULL");
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, udt: &str, nullable: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: udt.to_string(),
            is_nullable: nullable,
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
            column_default: None,
        }
    }

    #[test]
    fn test_sequence_name_plain() {
        assert_eq!(
            sequence_name_from_default("nextval('t_id_seq'::regclass)").as_deref(),
            Some("t_id_seq")
        );
    }

    #[test]
    fn test_sequence_name_qualified() {
        assert_eq!(
            sequence_name_from_default("nextval('public.t_id_seq'::regclass)").as_deref(),
            Some("t_id_seq")
        );
    }

    #[test]
    fn test_sequence_name_quoted() {
        assert_eq!(
            sequence_name_from_default("nextval('public.\"Orders_id_seq\"'::regclass)").as_deref(),
            Some("Orders_id_seq")
        );
    }

    #[test]
    fn test_sequence_name_rejects_non_nextval() {
        assert_eq!(sequence_name_from_default("42"), None);
        assert_eq!(sequence_name_from_default("now()"), None);
    }

    #[test]
    fn test_create_table_sql_shape() {
        let mut id = col("id", "integer", "int4", false);
        id.column_default = Some("nextval('t_id_seq'::regclass)".to_string());
        let name = col("name", "text", "text", true);

        let sql = create_table_sql("t", &[id, name], &["id".to_string()]);
        assert!(sql.starts_with("CREATE TABLE \"t\""));
        assert!(sql.contains("\"id\" integer NOT NULL"));
        // Sequence default deferred until ownership is wired.
        assert!(!sql.contains("nextval"));
        assert!(sql.contains("\"name\" text"));
        assert!(sql.contains("CONSTRAINT \"t_pkey\" PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_create_table_sql_without_pk() {
        let sql = create_table_sql("t", &[col("v", "text", "text", true)], &[]);
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_create_table_preserves_plain_default() {
        let mut c = col("flag", "boolean", "bool", false);
        c.column_default = Some("true".to_string());
        let sql = create_table_sql("t", &[c], &[]);
        assert!(sql.contains("\"flag\" boolean NOT NULL DEFAULT true"));
    }

    #[test]
    fn test_add_column_preserves_default() {
        let mut c = col("created_at", "timestamp without time zone", "timestamp", false);
        c.column_default = Some("now()".to_string());
        let sql = add_column_sql("t", &c);
        assert_eq!(
            sql,
            "ALTER TABLE \"t\" ADD COLUMN \"created_at\" timestamp DEFAULT now() NOT NULL"
        );
    }

    #[test]
    fn test_add_column_synthesizes_null_fill() {
        let c = col("flag", "boolean", "bool", false);
        let sql = add_column_sql("t", &c);
        assert_eq!(
            sql,
            "ALTER TABLE \"t\" ADD COLUMN \"flag\" boolean DEFAULT false NOT NULL"
        );
    }

    #[test]
    fn test_add_column_nullable_without_default() {
        let c = col("note", "text", "text", true);
        let sql = add_column_sql("t", &c);
        assert_eq!(sql, "ALTER TABLE \"t\" ADD COLUMN \"note\" text");
    }

    #[test]
    fn test_add_column_no_fill_for_unknown_type() {
        let c = col("blob", "bytea", "bytea", false);
        let sql = add_column_sql("t", &c);
        assert_eq!(sql, "ALTER TABLE \"t\" ADD COLUMN \"blob\" bytea NOT NULL");
    }
}
