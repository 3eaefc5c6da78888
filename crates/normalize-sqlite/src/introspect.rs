//! Schema introspection.
//!
//! Reads committed schema state through `sqlite_master` and the
//! bindable `pragma_table_info` / `pragma_foreign_key_list` table
//! functions. Results reflect the schema as of the call; callers that
//! asserted a table's presence get `TableNotFound` when it is missing.

use normalize_core::{Column, ForeignKey, SqlType};
use sqlx::SqliteConnection;

use crate::error::{NormalizeError, Result};

/// Columns and declared primary key of a table.
#[derive(Debug, Clone)]
pub(crate) struct TableInfo {
    /// Column schemas, in definition order.
    pub columns: Vec<Column>,
    /// Declared primary key columns, in key order. Empty for a rowid
    /// table.
    pub primary_key: Vec<String>,
}

/// Returns whether a table with the given name exists.
pub(crate) async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.is_some())
}

/// Lists user tables in creation order.
pub(crate) async fn table_names(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Returns the stored `CREATE TABLE` text.
pub(crate) async fn schema_sql(conn: &mut SqliteConnection, name: &str) -> Result<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(|(sql,)| sql)
        .ok_or_else(|| NormalizeError::TableNotFound(name.to_string()))
}

/// Reads column schemas and the declared primary key.
pub(crate) async fn table_info(conn: &mut SqliteConnection, name: &str) -> Result<TableInfo> {
    let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(
        "SELECT cid, name, \"type\", \"notnull\", dflt_value, pk FROM pragma_table_info(?)",
    )
    .bind(name)
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Err(NormalizeError::TableNotFound(name.to_string()));
    }

    let mut columns = Vec::with_capacity(rows.len());
    let mut pk_positions: Vec<(i64, String)> = Vec::new();
    for (_cid, col_name, declared, notnull, default, pk) in rows {
        let mut column = Column::new(&col_name, SqlType::from_declared(&declared));
        column.notnull = notnull != 0;
        column.default = default;
        if pk > 0 {
            pk_positions.push((pk, col_name));
        }
        columns.push(column);
    }
    pk_positions.sort_by_key(|(pos, _)| *pos);

    Ok(TableInfo {
        columns,
        primary_key: pk_positions.into_iter().map(|(_, name)| name).collect(),
    })
}

/// Reads foreign key constraints, in declaration order.
///
/// The pragma emits constraints in reverse declaration order, so the
/// query sorts by constraint id descending. A shorthand constraint
/// with no target column resolves to the referenced table's primary
/// key.
pub(crate) async fn foreign_keys(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Vec<ForeignKey>> {
    let rows: Vec<(i64, i64, String, String, Option<String>)> = sqlx::query_as(
        "SELECT id, seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?) \
         ORDER BY id DESC, seq",
    )
    .bind(name)
    .fetch_all(&mut *conn)
    .await?;

    let mut fks = Vec::with_capacity(rows.len());
    for (_id, _seq, other_table, column, other_column) in rows {
        let other_column = match other_column {
            Some(col) => col,
            None => referenced_pk(conn, &other_table).await?,
        };
        fks.push(ForeignKey::new(name, column, other_table, other_column));
    }
    Ok(fks)
}

async fn referenced_pk(conn: &mut SqliteConnection, table: &str) -> Result<String> {
    if !table_exists(conn, table).await? {
        return Ok("rowid".to_string());
    }
    let info = table_info(conn, table).await?;
    Ok(info
        .primary_key
        .first()
        .cloned()
        .unwrap_or_else(|| "rowid".to_string()))
}
