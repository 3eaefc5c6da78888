//! Column extraction.
//!
//! `Table::extract` lifts one or more columns into a lookup table and
//! replaces them with a foreign key: plan, reconcile the lookup table,
//! deduplicate values into it, then rewrite the source table. The whole
//! operation runs in one engine-opened transaction and either commits
//! completely or leaves the database untouched.

use std::collections::HashMap;

use normalize_core::ddl::{self, quote_ident};
use normalize_core::plan::{self, ExtractPlan};
use normalize_core::{Column, ForeignKey, SqlType, SqlValue, TableSpec, TupleKey};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::database::{execute_with, fetch_all_with, Table};
use crate::error::{NormalizeError, Result};
use crate::introspect::{self, TableInfo};
use crate::rewrite::{apply_rewrite, TableRewrite};

/// Optional parameters for [`Table::extract`].
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    table: Option<String>,
    fk_column: Option<String>,
    rename: Vec<(String, String)>,
}

impl ExtractOptions {
    /// Creates empty options; everything is derived from the columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lookup table name.
    #[must_use]
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Sets the foreign key column name.
    #[must_use]
    pub fn fk_column(mut self, name: impl Into<String>) -> Self {
        self.fk_column = Some(name.into());
        self
    }

    /// Renames a source column in the lookup table.
    #[must_use]
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.push((from.into(), to.into()));
        self
    }
}

impl Table {
    /// Extracts the given columns into a lookup table, replacing them
    /// with a foreign key column.
    ///
    /// The lookup table is created when missing and reused (appended
    /// to) when present; lookup ids are assigned in first-appearance
    /// order of the distinct value tuples. Re-running the same extract
    /// is a no-op.
    pub async fn extract(&self, columns: &[&str], options: ExtractOptions) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        execute_with(&mut tx, "PRAGMA defer_foreign_keys = ON", vec![]).await?;

        if !introspect::table_exists(&mut tx, self.name()).await? {
            return Err(NormalizeError::TableNotFound(self.name().to_string()));
        }
        let fks = introspect::foreign_keys(&mut tx, self.name()).await?;

        // Re-invocation: the planned constraint is already installed.
        let planned_lookup = options
            .table
            .clone()
            .unwrap_or_else(|| plan::derived_lookup_name(columns));
        let planned_fk = options
            .fk_column
            .clone()
            .unwrap_or_else(|| plan::derived_fk_column(&planned_lookup));
        let planned = ForeignKey::new(self.name(), &planned_fk, &planned_lookup, "id");
        if fks.contains(&planned) {
            info!(
                table = %self.name(),
                fk_column = %planned_fk,
                "extract already applied, nothing to do"
            );
            tx.commit().await?;
            return Ok(());
        }

        for name in columns {
            if fks.iter().any(|fk| fk.column == *name) {
                return Err(NormalizeError::InvalidColumns(format!(
                    "column {name} is already a foreign key"
                )));
            }
        }

        let source_info = introspect::table_info(&mut tx, self.name()).await?;
        let extract_plan = plan::resolve_extract(
            &source_info.columns,
            columns,
            options.table.as_deref(),
            options.fk_column.as_deref(),
            &options.rename,
        )?;

        if extract_plan.lookup_table == self.name() {
            return Err(NormalizeError::InvalidColumns(format!(
                "lookup table cannot be the source table {}",
                self.name()
            )));
        }
        let fk_collides = source_info
            .columns
            .iter()
            .any(|c| c.name == extract_plan.fk_column)
            && !extract_plan
                .source_columns
                .contains(&extract_plan.fk_column);
        if fk_collides {
            return Err(NormalizeError::InvalidColumns(format!(
                "column {} already exists on {}",
                extract_plan.fk_column,
                self.name()
            )));
        }

        info!(
            table = %self.name(),
            lookup = %extract_plan.lookup_table,
            fk_column = %extract_plan.fk_column,
            "extracting columns"
        );

        reconcile_lookup(&mut tx, &extract_plan).await?;
        populate_lookup(&mut tx, self.name(), &extract_plan).await?;
        rewrite_source(&mut tx, self.name(), &source_info, &fks, &extract_plan).await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Creates the lookup table or verifies an existing one is compatible.
async fn reconcile_lookup(conn: &mut SqliteConnection, plan: &ExtractPlan) -> Result<()> {
    if !introspect::table_exists(conn, &plan.lookup_table).await? {
        let mut spec =
            TableSpec::new(&plan.lookup_table).column(Column::new("id", SqlType::Integer));
        for column in &plan.lookup_columns {
            spec = spec.column(column.clone());
        }
        spec = spec.primary_key(vec!["id".to_string()]);
        execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;
        return Ok(());
    }

    let existing = introspect::table_info(conn, &plan.lookup_table).await?;
    let id_ok = existing.primary_key == ["id"]
        && matches!(
            existing.columns.iter().find(|c| c.name == "id"),
            Some(c) if c.sql_type == SqlType::Integer
        );
    if !id_ok {
        return Err(NormalizeError::InvalidColumns(format!(
            "lookup table {} must have an INTEGER primary key named id",
            plan.lookup_table
        )));
    }
    for wanted in &plan.lookup_columns {
        match existing.columns.iter().find(|c| c.name == wanted.name) {
            None => {
                return Err(NormalizeError::InvalidColumns(format!(
                    "lookup table {} has no column {}",
                    plan.lookup_table, wanted.name
                )));
            }
            Some(have) if have.sql_type != wanted.sql_type => {
                return Err(NormalizeError::InvalidColumns(format!(
                    "lookup table {} column {} is {} but {} is required",
                    plan.lookup_table,
                    wanted.name,
                    have.sql_type.name(),
                    wanted.sql_type.name()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Ensures a lookup row exists for every distinct tuple in the source,
/// assigning ids in first-appearance order.
async fn populate_lookup(
    conn: &mut SqliteConnection,
    source: &str,
    plan: &ExtractPlan,
) -> Result<()> {
    let select_columns: Vec<String> = plan
        .source_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect();
    let scan_sql = format!(
        "SELECT {} FROM {}",
        select_columns.join(", "),
        quote_ident(source)
    );
    let rows = fetch_all_with(conn, &scan_sql, vec![]).await?;

    let lookup_columns: Vec<String> = plan.lookup_columns.iter().map(|c| c.name.clone()).collect();
    let mut seen: HashMap<TupleKey, i64> = HashMap::new();
    for row in rows {
        let values: Vec<SqlValue> = row.values().cloned().collect();
        if values.iter().all(SqlValue::is_null) {
            continue;
        }
        let key = TupleKey::new(&values);
        if seen.contains_key(&key) {
            continue;
        }
        let id = get_or_create_lookup_id(conn, &plan.lookup_table, &lookup_columns, &values).await?;
        seen.insert(key, id);
    }
    debug!(
        lookup = %plan.lookup_table,
        distinct = seen.len(),
        "lookup populated"
    );
    Ok(())
}

/// Returns the id of the lookup row matching `values` on `columns`,
/// inserting a new row when none matches. Matching uses `IS` so NULL
/// components compare equal to themselves, with a `typeof` guard so
/// integer and real values stay distinct.
pub(crate) async fn get_or_create_lookup_id(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[String],
    values: &[SqlValue],
) -> Result<i64> {
    let matches: Vec<String> = columns
        .iter()
        .map(|c| {
            let c = quote_ident(c);
            format!("({c} IS ? AND typeof({c}) = typeof(?))")
        })
        .collect();
    let select_sql = format!(
        "SELECT [id] FROM {} WHERE {} LIMIT 1",
        quote_ident(table),
        matches.join(" AND ")
    );
    let probe_params: Vec<SqlValue> = values
        .iter()
        .flat_map(|v| [v.clone(), v.clone()])
        .collect();
    let found = fetch_all_with(conn, &select_sql, probe_params).await?;
    if let Some(id) = found.first().and_then(|row| row.get("id")).and_then(SqlValue::as_i64) {
        return Ok(id);
    }

    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(table),
        quoted.join(", ")
    );
    let result = execute_with(conn, &insert_sql, values.to_vec()).await?;
    Ok(result.last_insert_rowid())
}

/// Rewrites the source table: the foreign key column takes the place
/// of the leftmost extracted column, the extracted columns are
/// dropped, and the constraint to the lookup is installed.
async fn rewrite_source(
    conn: &mut SqliteConnection,
    source: &str,
    info: &TableInfo,
    existing_fks: &[ForeignKey],
    plan: &ExtractPlan,
) -> Result<()> {
    let matches: Vec<String> = plan
        .source_columns
        .iter()
        .zip(&plan.lookup_columns)
        .map(|(src, lookup)| {
            let lookup_col = format!(
                "{}.{}",
                quote_ident(&plan.lookup_table),
                quote_ident(&lookup.name)
            );
            let source_col = format!("{}.{}", quote_ident(source), quote_ident(src));
            format!("({lookup_col} IS {source_col} AND typeof({lookup_col}) = typeof({source_col}))")
        })
        .collect();
    let fk_expr = format!(
        "(SELECT [id] FROM {} WHERE {})",
        quote_ident(&plan.lookup_table),
        matches.join(" AND ")
    );

    let rowid_table = info.primary_key.is_empty();
    let mut columns = Vec::new();
    let mut projection = Vec::new();
    if rowid_table {
        columns.push(Column::new("rowid", SqlType::Integer));
        projection.push("[rowid]".to_string());
    }
    let mut fk_placed = false;
    for column in &info.columns {
        if plan.source_columns.contains(&column.name) {
            if !fk_placed {
                fk_placed = true;
                columns.push(Column::new(&plan.fk_column, SqlType::Integer));
                projection.push(fk_expr.clone());
            }
            continue;
        }
        columns.push(column.clone());
        projection.push(quote_ident(&column.name));
    }

    let mut foreign_keys: Vec<ForeignKey> = existing_fks
        .iter()
        .filter(|fk| {
            fk.column != plan.fk_column && columns.iter().any(|c| c.name == fk.column)
        })
        .cloned()
        .collect();
    foreign_keys.push(ForeignKey::new(
        source,
        &plan.fk_column,
        &plan.lookup_table,
        "id",
    ));

    let primary_key = if rowid_table {
        vec!["rowid".to_string()]
    } else {
        info.primary_key.clone()
    };

    apply_rewrite(
        conn,
        &TableRewrite {
            table: source.to_string(),
            columns,
            primary_key,
            foreign_keys,
            projection,
        },
    )
    .await
}
