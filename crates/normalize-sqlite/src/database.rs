//! Database and table handles.
//!
//! [`Database`] wraps a caller-provided [`SqlitePool`]; the engine
//! borrows it for the duration of each call and never closes or
//! reconfigures it. [`Database::table`] yields a lightweight [`Table`]
//! handle carrying the operations of the table abstraction: schema and
//! row access, inserts, and the extract / expand entry points defined
//! in their own modules.

use normalize_core::ddl::{self, quote_ident};
use normalize_core::{Column, ForeignKey, Row, SqlType, SqlValue, TableSpec};
use sqlx::sqlite::{SqlitePool, SqliteQueryResult, SqliteRow};
use sqlx::{Column as _, Row as _, SqliteConnection, TypeInfo as _, ValueRef as _};
use tracing::debug;

use crate::error::{NormalizeError, Result};
use crate::introspect;

/// Handle on a SQLite database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Wraps a connection pool owned by the caller.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns a handle on the named table.
    ///
    /// The table does not need to exist yet; `insert_all` creates it
    /// from the first row.
    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> Table {
        Table {
            pool: self.pool.clone(),
            name: name.into(),
        }
    }

    /// Lists user table names in creation order.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        introspect::table_names(&mut conn).await
    }

    /// Executes a parameterized statement, returning affected rows.
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = execute_with(&mut conn, sql, params).await?;
        Ok(result.rows_affected())
    }

    /// Runs a parameterized query, returning decoded rows.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        fetch_all_with(&mut conn, sql, params).await
    }
}

/// Handle on a single named table.
#[derive(Debug, Clone)]
pub struct Table {
    pool: SqlitePool,
    name: String,
}

impl Table {
    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns whether the table exists.
    pub async fn exists(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        introspect::table_exists(&mut conn, &self.name).await
    }

    /// Returns the stored `CREATE TABLE` text.
    pub async fn schema(&self) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        introspect::schema_sql(&mut conn, &self.name).await
    }

    /// Returns the column schemas, in order.
    pub async fn columns(&self) -> Result<Vec<Column>> {
        let mut conn = self.pool.acquire().await?;
        Ok(introspect::table_info(&mut conn, &self.name).await?.columns)
    }

    /// Returns the primary key column names, or `["rowid"]` for a
    /// table without a declared primary key.
    pub async fn pks(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let pks = introspect::table_info(&mut conn, &self.name)
            .await?
            .primary_key;
        if pks.is_empty() {
            Ok(vec!["rowid".to_string()])
        } else {
            Ok(pks)
        }
    }

    /// Returns the foreign keys, in declaration order.
    pub async fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let mut conn = self.pool.acquire().await?;
        introspect::foreign_keys(&mut conn, &self.name).await
    }

    /// Returns the number of rows.
    pub async fn count(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(&self.name)))
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }

    /// Returns all rows in storage order.
    pub async fn rows(&self) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        if !introspect::table_exists(&mut conn, &self.name).await? {
            return Err(NormalizeError::TableNotFound(self.name.clone()));
        }
        let sql = format!("SELECT * FROM {}", quote_ident(&self.name));
        fetch_all_with(&mut conn, &sql, vec![]).await
    }

    /// Returns the rows matching a WHERE clause.
    pub async fn rows_where(&self, clause: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT * FROM {} WHERE {clause}", quote_ident(&self.name));
        fetch_all_with(&mut conn, &sql, params).await
    }

    /// Inserts one row, creating the table from the row's value types
    /// when it does not exist yet. Returns the inserted rowid.
    pub async fn insert(&self, row: Row, pk: Option<&str>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        if !introspect::table_exists(&mut tx, &self.name).await? {
            self.create_from_row(&mut tx, &row, pk).await?;
        }
        let result = self.insert_row(&mut tx, &row).await?;
        let id = result.last_insert_rowid();
        tx.commit().await?;
        Ok(id)
    }

    /// Inserts a batch of rows inside one transaction, creating the
    /// table from the first row when it does not exist yet. Returns
    /// the number of inserted rows.
    pub async fn insert_all(&self, rows: Vec<Row>, pk: Option<&str>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0_u64;
        for row in &rows {
            if inserted == 0 && !introspect::table_exists(&mut tx, &self.name).await? {
                self.create_from_row(&mut tx, row, pk).await?;
            }
            self.insert_row(&mut tx, row).await?;
            inserted += 1;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Adds a column with a NULL default.
    pub async fn add_column(&self, name: &str, sql_type: SqlType) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        add_table_column(&mut conn, &self.name, name, sql_type).await
    }

    /// Drops a column through a table rewrite.
    pub async fn drop_column(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        execute_with(&mut tx, "PRAGMA defer_foreign_keys = ON", vec![]).await?;
        let info = introspect::table_info(&mut tx, &self.name).await?;
        if !info.columns.iter().any(|c| c.name == name) {
            return Err(NormalizeError::InvalidColumns(format!(
                "no such column: {name}"
            )));
        }
        crate::rewrite::drop_column(&mut tx, &self.name, name).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_row(&self, conn: &mut SqliteConnection, row: &Row) -> Result<SqliteQueryResult> {
        let columns: Vec<String> = row.columns().map(quote_ident).collect();
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(&self.name),
            columns.join(", ")
        );
        execute_with(conn, &sql, row.values().cloned().collect()).await
    }

    async fn create_from_row(
        &self,
        conn: &mut SqliteConnection,
        row: &Row,
        pk: Option<&str>,
    ) -> Result<()> {
        let mut spec = TableSpec::new(&self.name);
        if let Some(pk_name) = pk {
            if row.get(pk_name).is_none() {
                spec = spec.column(Column::new(pk_name, SqlType::Integer));
            }
        }
        for (name, value) in row.iter() {
            spec = spec.column(Column::new(name, SqlType::of_value(value)));
        }
        if let Some(pk_name) = pk {
            spec = spec.primary_key(vec![pk_name.to_string()]);
        }
        execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;
        Ok(())
    }
}

/// Adds a column to a table on an open connection.
pub(crate) async fn add_table_column(
    conn: &mut SqliteConnection,
    table: &str,
    name: &str,
    sql_type: SqlType,
) -> Result<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(name),
        sql_type.name()
    );
    execute_with(conn, &sql, vec![]).await?;
    Ok(())
}

/// Binds a [`SqlValue`] onto a query.
pub(crate) fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Int(n) => query.bind(n),
        SqlValue::Real(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Executes a parameterized statement on an open connection.
pub(crate) async fn execute_with(
    conn: &mut SqliteConnection,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<SqliteQueryResult> {
    debug!(sql = %sql, "executing");
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    Ok(query.execute(&mut *conn).await?)
}

/// Runs a parameterized query and decodes every row.
pub(crate) async fn fetch_all_with(
    conn: &mut SqliteConnection,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<Vec<Row>> {
    debug!(sql = %sql, "querying");
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    rows.iter().map(decode_row).collect()
}

/// Decodes a sqlx row into the engine's tagged row type, using the
/// runtime storage class of each cell.
fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get(idx)?),
                "REAL" => SqlValue::Real(row.try_get(idx)?),
                "BLOB" => SqlValue::Blob(row.try_get(idx)?),
                _ => SqlValue::Text(row.try_get(idx)?),
            }
        };
        out.push(column.name().to_string(), value);
    }
    Ok(out)
}
