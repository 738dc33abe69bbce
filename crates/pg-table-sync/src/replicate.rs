//! Data replication: overwrite, upsert, and insert-ignore.
//!
//! All three rules consume the source table in ascending physical order
//! (no `ORDER BY`) in batches of [`BATCH_SIZE`] rows. Overwrite writes
//! whole batches with a per-row fallback; upsert and insert-ignore write
//! row by row, so a conflicting row never poisons its neighbours.
//!
//! Destructive blocks (truncate, batch insert, row fallback) run inside a
//! replica session - `SET session_replication_role = replica` - which
//! disables foreign-key and normal trigger checks for that connection. The
//! session is restored on every exit path.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::catalog::{self, ColumnDescriptor};
use crate::error::{Result, SyncError};
use crate::identifier::quote_unchecked;
use crate::prepare::{self, ColumnPlan};
use crate::schema;
use crate::store::JobLogger;

/// Rows per source read and per bulk insert.
pub const BATCH_SIZE: i64 = 500;

/// Characters of serialized payload kept when logging a failed row.
const PAYLOAD_LOG_LIMIT: usize = 200;

/// Run an operation inside a replica session.
///
/// The `session_replication_role` setting is per-connection; it is restored
/// before this function returns, whether the operation succeeded or not.
pub async fn with_replica_role<'a, T, F>(client: &'a Client, op: F) -> Result<T>
where
    F: FnOnce(&'a Client) -> BoxFuture<'a, Result<T>>,
{
    client
        .batch_execute("SET session_replication_role = replica")
        .await?;

    let result = op(client).await;

    let restored = client
        .batch_execute("SET session_replication_role = DEFAULT")
        .await;

    match result {
        Ok(value) => {
            restored?;
            Ok(value)
        }
        Err(e) => {
            if let Err(restore_err) = restored {
                warn!("Failed to restore session_replication_role: {}", restore_err);
            }
            Err(e)
        }
    }
}

/// Overwrite rule: truncate the target and reload it from the source.
pub async fn overwrite(
    source: &Client,
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    logger: &JobLogger,
) -> Result<u64> {
    if cols.is_empty() {
        return Err(SyncError::table(table, "table not found in source"));
    }

    if !catalog::table_exists(target, table).await? {
        logger
            .info(table, "target table missing, replaying schema")
            .await;
        let changes = schema::replay(source, target, table, cols, logger).await?;
        if !changes.table_created {
            return Err(SyncError::table(table, "could not create target table"));
        }
    }

    let schedule = prepare::build_schedule(cols);

    if !catalog::table_is_empty(target, table).await? {
        let truncate = format!("TRUNCATE TABLE {} CASCADE", quote_unchecked(table));
        with_replica_role(target, |c| {
            async move {
                c.batch_execute(&truncate).await?;
                reset_sequences(c, table).await
            }
            .boxed()
        })
        .await?;
        logger.info(table, "truncated target table").await;
    }

    let select = select_batch_sql(table, &schedule);
    let mut offset: i64 = 0;
    let mut migrated: u64 = 0;

    loop {
        let rows = source.query(&select, &[&BATCH_SIZE, &offset]).await?;
        if rows.is_empty() {
            break;
        }

        let prepared: Vec<Vec<Option<String>>> = rows
            .iter()
            .map(|row| prepare::prepare_row(&schedule, &prepare::row_values(row, cols)))
            .collect();

        migrated += insert_batch(target, table, &schedule, &prepared, logger).await?;

        let fetched = rows.len() as i64;
        offset += fetched;
        if fetched < BATCH_SIZE {
            break;
        }
    }

    reset_sequences(target, table).await?;
    replay_unique_constraints(source, target, table, logger).await?;

    Ok(migrated)
}

/// Bulk-insert one batch, falling back to per-row inserts on failure.
///
/// Both paths run inside the replica session. Only rows that land are
/// counted; failed rows are logged with a payload prefix and not retried.
async fn insert_batch(
    target: &Client,
    table: &str,
    schedule: &[ColumnPlan],
    prepared: &[Vec<Option<String>>],
    logger: &JobLogger,
) -> Result<u64> {
    let batch_sql = insert_sql(table, schedule, prepared.len());
    let row_sql = insert_sql(table, schedule, 1);

    with_replica_role(target, |c| {
        async move {
            let params: Vec<&(dyn ToSql + Sync)> = prepared
                .iter()
                .flatten()
                .map(|v| v as &(dyn ToSql + Sync))
                .collect();

            match c.execute(&batch_sql, &params).await {
                Ok(n) => Ok(n),
                Err(batch_err) => {
                    debug!(
                        "Batch insert into {} failed ({}), retrying row by row",
                        table, batch_err
                    );

                    let mut inserted = 0u64;
                    for row in prepared {
                        let params: Vec<&(dyn ToSql + Sync)> =
                            row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
                        match c.execute(&row_sql, &params).await {
                            Ok(n) => inserted += n,
                            Err(e) => {
                                logger
                                    .warning(
                                        table,
                                        format!(
                                            "row insert failed: {}; payload: {}",
                                            e,
                                            payload_prefix(row)
                                        ),
                                    )
                                    .await;
                            }
                        }
                    }
                    Ok(inserted)
                }
            }
        }
        .boxed()
    })
    .await
}

/// Upsert rule: insert rows, updating every non-key column on conflict.
pub async fn upsert(
    source: &Client,
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    logger: &JobLogger,
) -> Result<u64> {
    if cols.is_empty() {
        return Err(SyncError::table(table, "table not found in source"));
    }

    let mut pk = catalog::primary_key(source, table).await?;
    if pk.is_empty() {
        pk = vec!["id".to_string()];
    }

    let schedule = prepare::build_schedule(cols);
    let sql = upsert_sql(table, &schedule, &pk);
    let select = select_batch_sql(table, &schedule);

    let mut offset: i64 = 0;
    let mut migrated: u64 = 0;

    loop {
        let rows = source.query(&select, &[&BATCH_SIZE, &offset]).await?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let prepared = prepare::prepare_row(&schedule, &prepare::row_values(row, cols));
            let params: Vec<&(dyn ToSql + Sync)> =
                prepared.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            match target.execute(&sql, &params).await {
                Ok(_) => migrated += 1,
                Err(e) => {
                    logger
                        .warning(
                            table,
                            format!("upsert failed: {}; payload: {}", e, payload_prefix(&prepared)),
                        )
                        .await;
                }
            }
        }

        let fetched = rows.len() as i64;
        offset += fetched;
        if fetched < BATCH_SIZE {
            break;
        }
    }

    Ok(migrated)
}

/// Insert-ignore rule: insert rows, silently skipping conflicts.
pub async fn insert_ignore(
    source: &Client,
    target: &Client,
    table: &str,
    cols: &[ColumnDescriptor],
    logger: &JobLogger,
) -> Result<u64> {
    if cols.is_empty() {
        return Err(SyncError::table(table, "table not found in source"));
    }

    let schedule = prepare::build_schedule(cols);
    let sql = insert_sql(table, &schedule, 1);
    let select = select_batch_sql(table, &schedule);

    let mut offset: i64 = 0;
    let mut migrated: u64 = 0;

    loop {
        let rows = source.query(&select, &[&BATCH_SIZE, &offset]).await?;
        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let prepared = prepare::prepare_row(&schedule, &prepare::row_values(row, cols));
            let params: Vec<&(dyn ToSql + Sync)> =
                prepared.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            match target.execute(&sql, &params).await {
                Ok(n) => migrated += n,
                Err(e) if is_unique_violation(&e.to_string()) => {
                    // Defining behaviour of the rule: conflicts are skipped.
                }
                Err(e) => {
                    logger
                        .warning(
                            table,
                            format!("insert failed: {}; payload: {}", e, payload_prefix(&prepared)),
                        )
                        .await;
                }
            }
        }

        let fetched = rows.len() as i64;
        offset += fetched;
        if fetched < BATCH_SIZE {
            break;
        }
    }

    Ok(migrated)
}

/// Point every sequence owned by a column of the table past the column max.
///
/// `setval(seq, max+1, false)` makes `max+1` the next value handed out; an
/// empty column resets to 1.
pub async fn reset_sequences(target: &Client, table: &str) -> Result<()> {
    let sequences = catalog::sequences(target, table).await?;

    for seq in sequences {
        let max_sql = format!(
            "SELECT COALESCE(MAX({})::int8, 0) FROM {}",
            quote_unchecked(&seq.column),
            quote_unchecked(table)
        );
        let max: i64 = target.query_one(&max_sql, &[]).await?.get(0);

        let next = if max > 0 { max + 1 } else { 1 };
        let setval = format!(
            "SELECT setval('{}', {}, false)",
            seq.name.replace('\'', "''"),
            next
        );
        target.query_one(&setval, &[]).await?;
        debug!("Reset sequence {} for {} to {}", seq.name, table, next);
    }

    Ok(())
}

/// Replay the source's unique constraints, ignoring ones already present.
async fn replay_unique_constraints(
    source: &Client,
    target: &Client,
    table: &str,
    logger: &JobLogger,
) -> Result<()> {
    let constraints = catalog::unique_constraints(source, table).await?;

    for constraint in constraints {
        let cols: Vec<String> = constraint
            .columns
            .iter()
            .map(|c| quote_unchecked(c))
            .collect();
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            quote_unchecked(table),
            quote_unchecked(&constraint.name),
            cols.join(", ")
        );

        if let Err(e) = target.batch_execute(&sql).await {
            let msg = e.to_string();
            if !msg.contains("already exists") {
                logger
                    .warning(
                        table,
                        format!("unique constraint {} replay failed: {}", constraint.name, msg),
                    )
                    .await;
            }
        }
    }

    Ok(())
}

/// `SELECT` for one source batch, in physical order.
fn select_batch_sql(table: &str, schedule: &[ColumnPlan]) -> String {
    let cols: Vec<&str> = schedule.iter().map(|p| p.quoted.as_str()).collect();
    format!(
        "SELECT {} FROM {} LIMIT $1 OFFSET $2",
        cols.join(", "),
        quote_unchecked(table)
    )
}

/// Multi-row `INSERT` with cast placeholders.
fn insert_sql(table: &str, schedule: &[ColumnPlan], rows: usize) -> String {
    let cols: Vec<&str> = schedule.iter().map(|p| p.quoted.as_str()).collect();
    let width = schedule.len();

    let tuples: Vec<String> = (0..rows)
        .map(|r| {
            let placeholders: Vec<String> = schedule
                .iter()
                .enumerate()
                .map(|(i, p)| format!("${}::{}", r * width + i + 1, p.cast))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_unchecked(table),
        cols.join(", "),
        tuples.join(", ")
    )
}

/// `INSERT ... ON CONFLICT` statement updating every non-key column.
///
/// Degrades to `DO NOTHING` when every column is part of the key.
fn upsert_sql(table: &str, schedule: &[ColumnPlan], pk: &[String]) -> String {
    let base = insert_sql(table, schedule, 1);
    let pk_quoted: Vec<String> = pk.iter().map(|c| quote_unchecked(c)).collect();

    let updates: Vec<String> = schedule
        .iter()
        .filter(|p| !pk.contains(&p.name))
        .map(|p| format!("{} = EXCLUDED.{}", p.quoted, p.quoted))
        .collect();

    if updates.is_empty() {
        format!("{} ON CONFLICT ({}) DO NOTHING", base, pk_quoted.join(", "))
    } else {
        format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {}",
            base,
            pk_quoted.join(", "),
            updates.join(", ")
        )
    }
}

/// True for errors raised by primary-key or unique-constraint conflicts.
fn is_unique_violation(message: &str) -> bool {
    message.contains("duplicate key") || message.contains("unique constraint")
}

/// Serialized row prefix for failure logs.
fn payload_prefix(row: &[Option<String>]) -> String {
    let payload = serde_json::to_string(row).unwrap_or_default();
    payload.chars().take(PAYLOAD_LOG_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use crate::prepare::build_schedule;

    fn cols() -> Vec<ColumnDescriptor> {
        ["id", "name"]
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                name: name.to_string(),
                data_type: if i == 0 { "integer" } else { "text" }.to_string(),
                udt_name: if i == 0 { "int4" } else { "text" }.to_string(),
                is_nullable: i != 0,
                character_maximum_length: None,
                numeric_precision: None,
                numeric_scale: None,
                column_default: None,
            })
            .collect()
    }

    #[test]
    fn test_select_batch_sql_has_no_order_by() {
        let schedule = build_schedule(&cols());
        let sql = select_batch_sql("t", &schedule);
        assert_eq!(sql, "SELECT \"id\", \"name\" FROM \"t\" LIMIT $1 OFFSET $2");
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn test_insert_sql_single_row() {
        let schedule = build_schedule(&cols());
        assert_eq!(
            insert_sql("t", &schedule, 1),
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES ($1::int4, $2::text)"
        );
    }

    #[test]
    fn test_insert_sql_numbers_placeholders_across_rows() {
        let schedule = build_schedule(&cols());
        let sql = insert_sql("t", &schedule, 3);
        assert!(sql.ends_with(
            "VALUES ($1::int4, $2::text), ($3::int4, $4::text), ($5::int4, $6::text)"
        ));
    }

    #[test]
    fn test_upsert_sql_updates_non_key_columns() {
        let schedule = build_schedule(&cols());
        let sql = upsert_sql("t", &schedule, &["id".to_string()]);
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
    }

    #[test]
    fn test_upsert_sql_all_key_columns_does_nothing() {
        let schedule = build_schedule(&cols());
        let sql = upsert_sql("t", &schedule, &["id".to_string(), "name".to_string()]);
        assert!(sql.ends_with("ON CONFLICT (\"id\", \"name\") DO NOTHING"));
    }

    #[test]
    fn test_unique_violation_detection() {
        assert!(is_unique_violation(
            "db error: ERROR: duplicate key value violates unique constraint \"t_pkey\""
        ));
        assert!(is_unique_violation("violates unique constraint \"u_email_key\""));
        assert!(!is_unique_violation("db error: ERROR: relation \"t\" does not exist"));
    }

    #[test]
    fn test_payload_prefix_truncates() {
        let row: Vec<Option<String>> = vec![Some("x".repeat(500))];
        assert_eq!(payload_prefix(&row).chars().count(), PAYLOAD_LOG_LIMIT);

        let short: Vec<Option<String>> = vec![Some("abc".to_string()), None];
        assert_eq!(payload_prefix(&short), "[\"abc\",null]");
    }

    #[test]
    fn test_batch_count_for_501_rows() {
        // 501 rows: one full batch of 500, then a short batch of 1.
        let total: i64 = 501;
        let mut offset = 0;
        let mut reads = 0;
        loop {
            let fetched = (total - offset).min(BATCH_SIZE);
            if fetched == 0 {
                break;
            }
            reads += 1;
            offset += fetched;
            if fetched < BATCH_SIZE {
                break;
            }
        }
        assert_eq!(reads, 2);
    }
}
