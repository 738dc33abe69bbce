//! Catalog introspection for source and target databases.
//!
//! Pure-read queries against `information_schema` and `pg_catalog`,
//! restricted to the `public` schema. Every result is ordered
//! deterministically (`ordinal_position` for columns) so that replayed DDL
//! and row batches are stable across runs.

use std::collections::HashSet;

use tokio_postgres::Client;
use tracing::debug;

use crate::error::Result;
use crate::identifier::{quote_unchecked, validate_identifier};

/// One column of a table, as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Logical catalog `data_type` (e.g. `character varying`, `ARRAY`).
    pub data_type: String,
    /// Underlying type name; for arrays the leading underscore names the
    /// element type (`_int4` is `int4[]`).
    pub udt_name: String,
    pub is_nullable: bool,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    /// Raw SQL default text; `nextval(...)` marks a sequence-backed column.
    pub column_default: Option<String>,
}

impl ColumnDescriptor {
    /// True for `json` and `jsonb` columns.
    pub fn is_json(&self) -> bool {
        matches!(self.data_type.as_str(), "json" | "jsonb")
            || matches!(self.udt_name.as_str(), "json" | "jsonb")
    }

    /// True for array columns.
    pub fn is_array(&self) -> bool {
        self.data_type == "ARRAY" || self.udt_name.starts_with('_')
    }

    /// Element type of an array column (`_int4` -> `int4`).
    pub fn element_type(&self) -> &str {
        self.udt_name.strip_prefix('_').unwrap_or(&self.udt_name)
    }

    /// True when the column default draws from a sequence.
    pub fn has_sequence_default(&self) -> bool {
        self.column_default
            .as_deref()
            .is_some_and(|d| d.contains("nextval("))
    }
}

/// A sequence owned by a table column.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDescriptor {
    pub name: String,
    pub increment: i64,
    pub minimum_value: i64,
    pub start_value: i64,
    /// The column whose default draws from this sequence.
    pub column: String,
}

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Primary,
    Unique,
    Foreign,
}

/// Referenced side of a foreign-key constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignRef {
    pub table: String,
    pub columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

/// A table constraint with ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDescriptor {
    pub kind: ConstraintKind,
    pub name: String,
    pub columns: Vec<String>,
    /// Present for foreign keys only.
    pub references: Option<ForeignRef>,
}

/// An index with its verbatim `CREATE INDEX` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub definition: String,
}

/// Load column descriptors for a table, in ordinal order.
///
/// An empty result means the table does not exist in this database.
pub async fn columns(client: &Client, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let query = r#"
        SELECT
            column_name::text,
            data_type::text,
            udt_name::text,
            (is_nullable = 'YES'),
            character_maximum_length::int4,
            numeric_precision::int4,
            numeric_scale::int4,
            column_default::text
        FROM information_schema.columns
        WHERE table_schema = 'public' AND table_name = $1
        ORDER BY ordinal_position
    "#;

    let rows = client.query(query, &[&table]).await?;

    let mut cols = Vec::with_capacity(rows.len());
    for row in rows {
        let col = ColumnDescriptor {
            name: row.get::<_, String>(0),
            data_type: row.get::<_, String>(1),
            udt_name: row.get::<_, String>(2),
            is_nullable: row.get::<_, bool>(3),
            character_maximum_length: row.get::<_, Option<i32>>(4),
            numeric_precision: row.get::<_, Option<i32>>(5),
            numeric_scale: row.get::<_, Option<i32>>(6),
            column_default: row.get::<_, Option<String>>(7),
        };
        validate_identifier(&col.name)?;
        cols.push(col);
    }

    debug!("Loaded {} columns for {}", cols.len(), table);
    Ok(cols)
}

/// Split columns into the JSON set and the ARRAY set.
///
/// Computed once per table; the sets feed the row-preparation schedule.
pub fn classify_columns(cols: &[ColumnDescriptor]) -> (HashSet<String>, HashSet<String>) {
    let json: HashSet<String> = cols
        .iter()
        .filter(|c| c.is_json())
        .map(|c| c.name.clone())
        .collect();
    let array: HashSet<String> = cols
        .iter()
        .filter(|c| c.is_array())
        .map(|c| c.name.clone())
        .collect();
    (json, array)
}

/// Load the sequences owned by a table's columns.
pub async fn sequences(client: &Client, table: &str) -> Result<Vec<SequenceDescriptor>> {
    let query = r#"
        SELECT
            s.sequence_name::text,
            s.increment::int8,
            s.minimum_value::int8,
            s.start_value::int8,
            c.column_name::text
        FROM information_schema.columns c
        JOIN information_schema.sequences s
          ON s.sequence_schema = 'public'
         AND pg_get_serial_sequence(
                 quote_ident(c.table_schema) || '.' || quote_ident(c.table_name),
                 c.column_name
             ) = quote_ident(s.sequence_schema) || '.' || quote_ident(s.sequence_name)
        WHERE c.table_schema = 'public' AND c.table_name = $1
        ORDER BY c.ordinal_position
    "#;

    let rows = client.query(query, &[&table]).await?;

    let mut seqs = Vec::with_capacity(rows.len());
    for row in rows {
        let seq = SequenceDescriptor {
            name: row.get::<_, String>(0),
            increment: row.get::<_, i64>(1),
            minimum_value: row.get::<_, i64>(2),
            start_value: row.get::<_, i64>(3),
            column: row.get::<_, String>(4),
        };
        validate_identifier(&seq.name)?;
        seqs.push(seq);
    }

    debug!("Loaded {} sequences for {}", seqs.len(), table);
    Ok(seqs)
}

/// Load the unique constraints of a table (primary key excluded).
pub async fn unique_constraints(
    client: &Client,
    table: &str,
) -> Result<Vec<ConstraintDescriptor>> {
    let query = r#"
        SELECT
            tc.constraint_name::text,
            array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position)
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON kcu.constraint_schema = tc.constraint_schema
         AND kcu.constraint_name = tc.constraint_name
        WHERE tc.table_schema = 'public'
          AND tc.table_name = $1
          AND tc.constraint_type = 'UNIQUE'
        GROUP BY tc.constraint_name
        ORDER BY tc.constraint_name
    "#;

    let rows = client.query(query, &[&table]).await?;

    let mut constraints = Vec::with_capacity(rows.len());
    for row in rows {
        constraints.push(ConstraintDescriptor {
            kind: ConstraintKind::Unique,
            name: row.get::<_, String>(0),
            columns: row.get::<_, Vec<String>>(1),
            references: None,
        });
    }

    Ok(constraints)
}

/// Load the primary-key column names of a table, in key order.
pub async fn primary_key(client: &Client, table: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT a.attname::text
        FROM pg_catalog.pg_index i
        JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_attribute a
          ON a.attrelid = t.oid AND a.attnum = ANY(i.indkey)
        WHERE n.nspname = 'public'
          AND t.relname = $1
          AND i.indisprimary
        ORDER BY array_position(i.indkey::int2[], a.attnum)
    "#;

    let rows = client.query(query, &[&table]).await?;
    let pk: Vec<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();

    debug!("Primary key for {}: {:?}", table, pk);
    Ok(pk)
}

/// Load the foreign-key constraints of a table.
pub async fn foreign_keys(client: &Client, table: &str) -> Result<Vec<ConstraintDescriptor>> {
    let query = r#"
        SELECT
            c.conname::text,
            array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum)),
            rt.relname::text,
            array_agg(ra.attname::text ORDER BY array_position(c.confkey, ra.attnum)),
            CASE c.confupdtype
                WHEN 'a' THEN 'NO ACTION'
                WHEN 'r' THEN 'RESTRICT'
                WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END,
            CASE c.confdeltype
                WHEN 'a' THEN 'NO ACTION'
                WHEN 'r' THEN 'RESTRICT'
                WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT'
                ELSE 'NO ACTION'
            END
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
        JOIN pg_catalog.pg_attribute a
          ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
        JOIN pg_catalog.pg_attribute ra
          ON ra.attrelid = rt.oid AND ra.attnum = ANY(c.confkey)
        WHERE n.nspname = 'public'
          AND t.relname = $1
          AND c.contype = 'f'
        GROUP BY c.conname, rt.relname, c.confupdtype, c.confdeltype
        ORDER BY c.conname
    "#;

    let rows = client.query(query, &[&table]).await?;

    let mut fks = Vec::with_capacity(rows.len());
    for row in rows {
        fks.push(ConstraintDescriptor {
            kind: ConstraintKind::Foreign,
            name: row.get::<_, String>(0),
            columns: row.get::<_, Vec<String>>(1),
            references: Some(ForeignRef {
                table: row.get::<_, String>(2),
                columns: row.get::<_, Vec<String>>(3),
                on_update: row.get::<_, String>(4),
                on_delete: row.get::<_, String>(5),
            }),
        });
    }

    Ok(fks)
}

/// Load non-primary-key indexes with their verbatim definitions.
pub async fn indexes(client: &Client, table: &str) -> Result<Vec<IndexDescriptor>> {
    let query = r#"
        SELECT indexname::text, indexdef::text
        FROM pg_catalog.pg_indexes
        WHERE schemaname = 'public'
          AND tablename = $1
          AND indexname NOT LIKE '%_pkey'
        ORDER BY indexname
    "#;

    let rows = client.query(query, &[&table]).await?;

    Ok(rows
        .iter()
        .map(|r| IndexDescriptor {
            name: r.get::<_, String>(0),
            definition: r.get::<_, String>(1),
        })
        .collect())
}

/// Check whether a table exists in the `public` schema.
pub async fn table_exists(client: &Client, table: &str) -> Result<bool> {
    let query = r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = $1
        )
    "#;

    let row = client.query_one(query, &[&table]).await?;
    Ok(row.get::<_, bool>(0))
}

/// Check whether a table holds zero rows.
pub async fn table_is_empty(client: &Client, table: &str) -> Result<bool> {
    let query = format!("SELECT count(*)::int8 = 0 FROM {}", quote_unchecked(table));
    let row = client.query_one(&query, &[]).await?;
    Ok(row.get::<_, bool>(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, udt: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: udt.to_string(),
            is_nullable: true,
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
            column_default: None,
        }
    }

    #[test]
    fn test_json_classification() {
        assert!(col("d", "jsonb", "jsonb").is_json());
        assert!(col("d", "json", "json").is_json());
        assert!(col("d", "USER-DEFINED", "jsonb").is_json());
        assert!(!col("d", "text", "text").is_json());
    }

    #[test]
    fn test_array_classification() {
        assert!(col("t", "ARRAY", "_text").is_array());
        assert!(col("t", "ARRAY", "_int4").is_array());
        assert!(!col("t", "integer", "int4").is_array());
    }

    #[test]
    fn test_array_element_type() {
        assert_eq!(col("t", "ARRAY", "_text").element_type(), "text");
        assert_eq!(col("t", "ARRAY", "_int8").element_type(), "int8");
        assert_eq!(col("t", "integer", "int4").element_type(), "int4");
    }

    #[test]
    fn test_classify_columns_builds_both_sets() {
        let cols = vec![
            col("id", "integer", "int4"),
            col("payload", "jsonb", "jsonb"),
            col("tags", "ARRAY", "_text"),
        ];
        let (json, array) = classify_columns(&cols);
        assert!(json.contains("payload"));
        assert!(!json.contains("tags"));
        assert!(array.contains("tags"));
        assert_eq!(json.len(), 1);
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_sequence_default_detection() {
        let mut c = col("id", "integer", "int4");
        assert!(!c.has_sequence_default());
        c.column_default = Some("nextval('t_id_seq'::regclass)".to_string());
        assert!(c.has_sequence_default());
        c.column_default = Some("42".to_string());
        assert!(!c.has_sequence_default());
    }
}
