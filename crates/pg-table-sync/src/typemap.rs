//! Type mapping between catalog metadata and emitted SQL.
//!
//! Two lookup tables drive schema replay: the column type rendered into
//! `CREATE TABLE` / `ADD COLUMN`, and the synthetic default used to
//! backfill a `NOT NULL` column added to a populated table.

use crate::catalog::ColumnDescriptor;

/// Render the SQL type for a column.
pub fn map_column_type(col: &ColumnDescriptor) -> String {
    match col.data_type.as_str() {
        "character varying" => {
            format!("varchar({})", col.character_maximum_length.unwrap_or(255))
        }
        "character" => format!("char({})", col.character_maximum_length.unwrap_or(1)),
        "numeric" => format!(
            "numeric({},{})",
            col.numeric_precision.unwrap_or(10),
            col.numeric_scale.unwrap_or(2)
        ),
        "integer" | "bigint" | "smallint" | "boolean" | "text" | "json" | "jsonb" | "uuid"
        | "date" | "bytea" | "real" => col.data_type.clone(),
        "double precision" => "double precision".to_string(),
        "timestamp without time zone" => "timestamp".to_string(),
        "timestamp with time zone" => "timestamptz".to_string(),
        "time without time zone" => "time".to_string(),
        "ARRAY" => format!("{}[]", col.element_type()),
        _ => {
            if col.udt_name.is_empty() {
                col.data_type.clone()
            } else {
                col.udt_name.clone()
            }
        }
    }
}

/// Cast type appended to insert placeholders (`$1::jsonb`).
///
/// Length and precision are dropped so that a textual parameter casts to
/// the base type without re-checking constraints the column already owns.
pub fn cast_type(col: &ColumnDescriptor) -> String {
    if col.is_array() {
        format!("{}[]", col.element_type())
    } else {
        col.udt_name.clone()
    }
}

/// Synthetic default used when adding a `NOT NULL` column without one.
///
/// Keeps existing target rows valid. Returns `None` for types with no safe
/// fill value; the ADD may then fail and is reported as a column-level error.
pub fn null_fill_default(col: &ColumnDescriptor) -> Option<&'static str> {
    match col.data_type.as_str() {
        "integer" | "bigint" | "smallint" | "numeric" | "double precision" | "real" => Some("0"),
        "boolean" => Some("false"),
        "character varying" | "character" | "text" => Some("''"),
        "json" | "jsonb" => Some("'{}'"),
        "timestamp without time zone" | "timestamp with time zone" => Some("NOW()"),
        "date" => Some("CURRENT_DATE"),
        "uuid" => Some("gen_random_uuid()"),
        "time without time zone" => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(data_type: &str, udt: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "c".to_string(),
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
    fn test_varchar_carries_length() {
        let mut c = col("character varying", "varchar");
        c.character_maximum_length = Some(100);
        assert_eq!(map_column_type(&c), "varchar(100)");
    }

    #[test]
    fn test_varchar_defaults_to_255() {
        assert_eq!(map_column_type(&col("character varying", "varchar")), "varchar(255)");
    }

    #[test]
    fn test_char_defaults_to_1() {
        assert_eq!(map_column_type(&col("character", "bpchar")), "char(1)");
    }

    #[test]
    fn test_numeric_precision_and_scale() {
        let mut c = col("numeric", "numeric");
        c.numeric_precision = Some(12);
        c.numeric_scale = Some(4);
        assert_eq!(map_column_type(&c), "numeric(12,4)");
        assert_eq!(map_column_type(&col("numeric", "numeric")), "numeric(10,2)");
    }

    #[test]
    fn test_identity_types() {
        for dt in [
            "integer", "bigint", "smallint", "boolean", "text", "json", "jsonb", "uuid", "date",
            "bytea", "real",
        ] {
            assert_eq!(map_column_type(&col(dt, dt)), dt);
        }
    }

    #[test]
    fn test_timestamp_aliases() {
        assert_eq!(
            map_column_type(&col("timestamp without time zone", "timestamp")),
            "timestamp"
        );
        assert_eq!(
            map_column_type(&col("timestamp with time zone", "timestamptz")),
            "timestamptz"
        );
        assert_eq!(map_column_type(&col("time without time zone", "time")), "time");
    }

    #[test]
    fn test_array_strips_underscore_and_appends_brackets() {
        assert_eq!(map_column_type(&col("ARRAY", "_text")), "text[]");
        assert_eq!(map_column_type(&col("ARRAY", "_int4")), "int4[]");
    }

    #[test]
    fn test_fallback_prefers_udt_name() {
        assert_eq!(map_column_type(&col("USER-DEFINED", "citext")), "citext");
        assert_eq!(map_column_type(&col("interval", "")), "interval");
    }

    #[test]
    fn test_cast_type_drops_length() {
        let mut c = col("character varying", "varchar");
        c.character_maximum_length = Some(40);
        assert_eq!(cast_type(&c), "varchar");
        assert_eq!(cast_type(&col("ARRAY", "_int8")), "int8[]");
        assert_eq!(cast_type(&col("jsonb", "jsonb")), "jsonb");
    }

    #[test]
    fn test_null_fill_table() {
        assert_eq!(null_fill_default(&col("integer", "int4")), Some("0"));
        assert_eq!(null_fill_default(&col("numeric", "numeric")), Some("0"));
        assert_eq!(null_fill_default(&col("boolean", "bool")), Some("false"));
        assert_eq!(null_fill_default(&col("text", "text")), Some("''"));
        assert_eq!(null_fill_default(&col("jsonb", "jsonb")), Some("'{}'"));
        assert_eq!(
            null_fill_default(&col("timestamp without time zone", "timestamp")),
            Some("NOW()")
        );
        assert_eq!(null_fill_default(&col("date", "date")), Some("CURRENT_DATE"));
        assert_eq!(null_fill_default(&col("uuid", "uuid")), Some("gen_random_uuid()"));
        assert_eq!(null_fill_default(&col("bytea", "bytea")), None);
    }
}
