//! Row preparation for target inserts.
//!
//! Source rows are decoded into `serde_json::Value`s and rendered to the
//! textual surface PostgreSQL accepts for every column type: JSON text for
//! `json`/`jsonb`, the `{...}` literal for arrays, and plain text casts for
//! everything else. Staying textual avoids bespoke binary encoders while
//! supporting nested values the driver would otherwise reject.
//!
//! A schedule is computed once per table - one [`ColumnPlan`] per column -
//! and rows are then prepared positionally, avoiding per-row map lookups.

use serde_json::Value;
use tokio_postgres::types::FromSql;
use tokio_postgres::Row;
use tracing::{debug, warn};

use crate::catalog::ColumnDescriptor;
use crate::identifier::quote_unchecked;
use crate::typemap;

/// How a column's values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    /// JSON/JSONB columns.
    Json,
    /// Array columns.
    Array,
    /// Everything else.
    Plain,
}

/// Precomputed rendering plan for one column.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub name: String,
    /// Quoted identifier, ready for splicing.
    pub quoted: String,
    /// Cast appended to the insert placeholder (`$1::jsonb`).
    pub cast: String,
    pub converter: Converter,
}

/// Build the per-table schedule from introspected columns.
pub fn build_schedule(cols: &[ColumnDescriptor]) -> Vec<ColumnPlan> {
    cols.iter()
        .map(|c| {
            let converter = if c.is_json() {
                Converter::Json
            } else if c.is_array() {
                Converter::Array
            } else {
                Converter::Plain
            };
            ColumnPlan {
                name: c.name.clone(),
                quoted: quote_unchecked(&c.name),
                cast: typemap::cast_type(c),
                converter,
            }
        })
        .collect()
}

/// Prepare one row for insertion.
///
/// `values` must be positionally aligned with the schedule. Missing trailing
/// values are treated as null.
pub fn prepare_row(schedule: &[ColumnPlan], values: &[Value]) -> Vec<Option<String>> {
    schedule
        .iter()
        .enumerate()
        .map(|(idx, plan)| prepare_value(plan, values.get(idx).unwrap_or(&Value::Null)))
        .collect()
}

/// Apply the rendering rules for a single value.
fn prepare_value(plan: &ColumnPlan, value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }

    match plan.converter {
        Converter::Json => match value {
            Value::Object(_) | Value::Array(_) => serialize_or_null(plan, value),
            Value::String(s) => {
                if serde_json::from_str::<Value>(s).is_ok() {
                    // Already valid JSON text; pass through verbatim.
                    Some(s.clone())
                } else {
                    serialize_or_null(plan, value)
                }
            }
            other => scalar_text(other),
        },
        Converter::Array => match value {
            Value::Array(items) => Some(array_literal(items)),
            Value::String(s) if s.starts_with('{') => Some(s.clone()),
            other => scalar_text(other),
        },
        Converter::Plain => match value {
            Value::Object(_) | Value::Array(_) => serialize_or_null(plan, value),
            other => scalar_text(other),
        },
    }
}

fn serialize_or_null(plan: &ColumnPlan, value: &Value) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Column {}: failed to serialize value, substituting null: {}", plan.name, e);
            None
        }
    }
}

/// Textual form of a scalar value.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value).ok(),
    }
}

/// Render a PostgreSQL array literal `{elem1,elem2,...}`.
///
/// String elements are double-quoted with backslash escapes for embedded
/// `\` and `"`; nulls become unquoted `NULL`.
pub fn array_literal(items: &[Value]) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote_array_element(s),
            Value::Array(inner) => array_literal(inner),
            Value::Object(_) => {
                quote_array_element(&serde_json::to_string(item).unwrap_or_default())
            }
        })
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn quote_array_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Decode one source row into JSON values, positionally aligned with `cols`.
pub fn row_values(row: &Row, cols: &[ColumnDescriptor]) -> Vec<Value> {
    cols.iter()
        .enumerate()
        .map(|(idx, col)| decode_value(row, idx, col))
        .collect()
}

fn get_opt<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Decode a column value by its catalog type.
///
/// Types without a native decoding fall back to text, then to null.
fn decode_value(row: &Row, idx: usize, col: &ColumnDescriptor) -> Value {
    let udt = col.udt_name.as_str();

    if let Some(element) = udt.strip_prefix('_') {
        return decode_array(row, idx, col, element);
    }

    match udt {
        "bool" => get_opt::<bool>(row, idx).map(Value::from),
        "int2" => get_opt::<i16>(row, idx).map(Value::from),
        "int4" => get_opt::<i32>(row, idx).map(Value::from),
        "int8" => get_opt::<i64>(row, idx).map(Value::from),
        "float4" => get_opt::<f32>(row, idx).and_then(|v| number(v as f64)),
        "float8" => get_opt::<f64>(row, idx).and_then(number),
        "numeric" => get_opt::<rust_decimal::Decimal>(row, idx)
            .map(|d| Value::String(d.to_string())),
        "json" | "jsonb" => get_opt::<Value>(row, idx),
        "uuid" => get_opt::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        "timestamp" => get_opt::<chrono::NaiveDateTime>(row, idx)
            .map(|t| Value::String(t.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
        "timestamptz" => get_opt::<chrono::DateTime<chrono::FixedOffset>>(row, idx)
            .map(|t| Value::String(t.to_rfc3339())),
        "date" => get_opt::<chrono::NaiveDate>(row, idx)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "time" => get_opt::<chrono::NaiveTime>(row, idx)
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "bytea" => get_opt::<Vec<u8>>(row, idx)
            .map(|b| Value::String(format!("\\x{}", hex::encode(b)))),
        _ => match get_opt::<String>(row, idx) {
            Some(s) => Some(Value::String(s)),
            None => {
                debug!(
                    "Column {} ({}): no textual decoding, reading as null",
                    col.name, col.udt_name
                );
                None
            }
        },
    }
    .unwrap_or(Value::Null)
}

fn decode_array(row: &Row, idx: usize, col: &ColumnDescriptor, element: &str) -> Value {
    let items: Option<Vec<Value>> = match element {
        "text" | "varchar" | "bpchar" | "name" => {
            get_opt::<Vec<String>>(row, idx).map(|v| v.into_iter().map(Value::from).collect())
        }
        "int2" => get_opt::<Vec<i16>>(row, idx).map(|v| v.into_iter().map(Value::from).collect()),
        "int4" => get_opt::<Vec<i32>>(row, idx).map(|v| v.into_iter().map(Value::from).collect()),
        "int8" => get_opt::<Vec<i64>>(row, idx).map(|v| v.into_iter().map(Value::from).collect()),
        "bool" => get_opt::<Vec<bool>>(row, idx).map(|v| v.into_iter().map(Value::from).collect()),
        "float4" => get_opt::<Vec<f32>>(row, idx)
            .map(|v| v.into_iter().map(|f| number(f as f64).unwrap_or(Value::Null)).collect()),
        "float8" => get_opt::<Vec<f64>>(row, idx)
            .map(|v| v.into_iter().map(|f| number(f).unwrap_or(Value::Null)).collect()),
        "numeric" => get_opt::<Vec<rust_decimal::Decimal>>(row, idx)
            .map(|v| v.into_iter().map(|d| Value::String(d.to_string())).collect()),
        "uuid" => get_opt::<Vec<uuid::Uuid>>(row, idx)
            .map(|v| v.into_iter().map(|u| Value::String(u.to_string())).collect()),
        other => {
            debug!(
                "Column {}: unsupported array element type {}, reading as null",
                col.name, other
            );
            None
        }
    };

    items.map(Value::Array).unwrap_or(Value::Null)
}

fn number(v: f64) -> Option<Value> {
    serde_json::Number::from_f64(v).map(Value::Number)
}
