//! Table rewriting.
//!
//! SQLite cannot add a foreign key, move a column, or change a primary
//! key with `ALTER TABLE`, so schema changes that need any of those go
//! through the table recreation strategy: create a new table with the
//! target schema, copy the rows across with a projection, drop the
//! original, rename the new table into place. The rename step is also
//! what makes SQLite store the schema under the double-quoted table
//! name that callers read back.

use normalize_core::ddl::{self, quote_ident};
use normalize_core::{Column, ForeignKey, SqlType, TableSpec};
use sqlx::SqliteConnection;
use tracing::info;

use crate::database::execute_with;
use crate::error::Result;
use crate::introspect;

/// A planned table rewrite.
///
/// `projection` holds one SQL expression per target column, evaluated
/// against the original table.
#[derive(Debug, Clone)]
pub(crate) struct TableRewrite {
    /// Table being rewritten.
    pub table: String,
    /// Target columns, in order.
    pub columns: Vec<Column>,
    /// Target primary key.
    pub primary_key: Vec<String>,
    /// Target foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Select expression per target column.
    pub projection: Vec<String>,
}

/// Applies a rewrite on an open connection.
///
/// Runs inside the caller's transaction; foreign key checks against
/// the dropped-and-renamed table are deferred to commit.
pub(crate) async fn apply_rewrite(
    conn: &mut SqliteConnection,
    rewrite: &TableRewrite,
) -> Result<()> {
    let temp = temp_name(conn, &rewrite.table).await?;
    info!(table = %rewrite.table, via = %temp, "rewriting table");

    let spec = TableSpec {
        name: temp.clone(),
        columns: rewrite.columns.clone(),
        primary_key: rewrite.primary_key.clone(),
        foreign_keys: rewrite.foreign_keys.clone(),
    };
    execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;

    let target_columns: Vec<String> = rewrite
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect();
    let copy_sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(&temp),
        target_columns.join(", "),
        rewrite.projection.join(", "),
        quote_ident(&rewrite.table)
    );
    execute_with(conn, &copy_sql, vec![]).await?;

    execute_with(
        conn,
        &format!("DROP TABLE {}", quote_ident(&rewrite.table)),
        vec![],
    )
    .await?;
    execute_with(
        conn,
        &format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&temp),
            quote_ident(&rewrite.table)
        ),
        vec![],
    )
    .await?;
    Ok(())
}

/// Drops a column by rewriting the table without it. Foreign keys on
/// the dropped column go with it; a table left without a declared
/// primary key gets an explicit `rowid` one.
pub(crate) async fn drop_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<()> {
    let info = introspect::table_info(conn, table).await?;
    let fks = introspect::foreign_keys(conn, table).await?;
    let rowid_table = info.primary_key.is_empty();
    let mut columns = Vec::new();
    let mut projection = Vec::new();
    if rowid_table {
        columns.push(Column::new("rowid", SqlType::Integer));
        projection.push("[rowid]".to_string());
    }
    for col in &info.columns {
        if col.name == column {
            continue;
        }
        columns.push(col.clone());
        projection.push(quote_ident(&col.name));
    }
    let foreign_keys = fks
        .iter()
        .filter(|fk| fk.column != column)
        .cloned()
        .collect();
    let primary_key = if rowid_table {
        vec!["rowid".to_string()]
    } else {
        info.primary_key.clone()
    };

    apply_rewrite(
        conn,
        &TableRewrite {
            table: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
            projection,
        },
    )
    .await
}

/// Picks an unused working name for the rewrite copy.
async fn temp_name(conn: &mut SqliteConnection, table: &str) -> Result<String> {
    let mut candidate = format!("{table}_new");
    let mut suffix = 1;
    while introspect::table_exists(conn, &candidate).await? {
        suffix += 1;
        candidate = format!("{table}_new_{suffix}");
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use normalize_core::SqlType;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    #[tokio::test]
    async fn test_rewrite_reorders_and_drops_columns() {
        let pool = create_test_pool().await;
        let mut tx = pool.begin().await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b TEXT)")
            .execute(&mut *tx)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (1, 'x', 'y')")
            .execute(&mut *tx)
            .await
            .unwrap();

        let rewrite = TableRewrite {
            table: "t".to_string(),
            columns: vec![
                Column::new("id", SqlType::Integer),
                Column::new("b", SqlType::Text),
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
            projection: vec!["[id]".to_string(), "[b]".to_string()],
        };
        apply_rewrite(&mut tx, &rewrite).await.unwrap();
        tx.commit().await.unwrap();

        let (sql,): (String,) =
            sqlx::query_as("SELECT sql FROM sqlite_master WHERE name = 't'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"t\" (\n   [id] INTEGER PRIMARY KEY,\n   [b] TEXT\n)"
        );

        let (b,): (String,) = sqlx::query_as("SELECT b FROM t WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(b, "y");
    }

    #[tokio::test]
    async fn test_temp_name_probes_past_collisions() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t_new (id INTEGER)")
            .execute(&mut *conn)
            .await
            .unwrap();

        assert_eq!(temp_name(&mut conn, "t").await.unwrap(), "t_new_2");
    }
}
