//! Extract planning.
//!
//! The planner validates a requested column set against the source
//! schema and derives the lookup-table name, the foreign-key column
//! name, and the (possibly renamed) lookup columns. It is pure: all
//! database interaction happens in the engine crate.

use crate::schema::Column;

/// Validation failures raised while planning an extract.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The requested column list was empty.
    #[error("no columns specified")]
    EmptyColumns,

    /// A column was requested more than once.
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// Requested columns that do not exist on the source table.
    #[error("invalid columns, missing from table: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A rename key does not appear in the requested columns.
    #[error("rename refers to unknown column: {0}")]
    UnknownRenameColumn(String),

    /// Two columns map to the same name after renaming.
    #[error("rename collision on column name: {0}")]
    RenameCollision(String),
}

/// The resolved shape of an extract operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractPlan {
    /// Name of the foreign-key column injected into the source table.
    pub fk_column: String,
    /// Name of the lookup table.
    pub lookup_table: String,
    /// Requested source columns, in request order.
    pub source_columns: Vec<String>,
    /// Lookup columns after renaming, carrying the inherited types.
    /// Order matches `source_columns`.
    pub lookup_columns: Vec<Column>,
}

/// Derives the lookup-table name from the requested columns.
///
/// Original column names are joined with underscores; renames do not
/// participate.
#[must_use]
pub fn derived_lookup_name(requested: &[&str]) -> String {
    requested.join("_")
}

/// Derives the foreign-key column name from a lookup-table name.
#[must_use]
pub fn derived_fk_column(lookup_table: &str) -> String {
    format!("{lookup_table}_id")
}

/// Resolves an extract request into an [`ExtractPlan`].
///
/// `source` is the introspected schema of the source table. `rename`
/// maps requested column names to their names in the lookup table.
pub fn resolve_extract(
    source: &[Column],
    requested: &[&str],
    lookup_table: Option<&str>,
    fk_column: Option<&str>,
    rename: &[(String, String)],
) -> Result<ExtractPlan, PlanError> {
    if requested.is_empty() {
        return Err(PlanError::EmptyColumns);
    }
    for (i, name) in requested.iter().enumerate() {
        if requested[..i].contains(name) {
            return Err(PlanError::DuplicateColumn((*name).to_string()));
        }
    }

    let missing: Vec<String> = requested
        .iter()
        .filter(|name| !source.iter().any(|c| c.name == **name))
        .map(|name| (*name).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PlanError::MissingColumns(missing));
    }

    for (from, _) in rename {
        if !requested.contains(&from.as_str()) {
            return Err(PlanError::UnknownRenameColumn(from.clone()));
        }
    }

    let lookup_table = lookup_table.map_or_else(|| derived_lookup_name(requested), String::from);
    let fk_column = fk_column.map_or_else(|| derived_fk_column(&lookup_table), String::from);

    let mut lookup_columns = Vec::with_capacity(requested.len());
    for name in requested {
        let effective = rename
            .iter()
            .find(|(from, _)| from.as_str() == *name)
            .map_or(*name, |(_, to)| to.as_str());
        if lookup_columns
            .iter()
            .any(|c: &Column| c.name == effective)
            || effective == "id"
        {
            return Err(PlanError::RenameCollision(effective.to_string()));
        }
        let source_column = source
            .iter()
            .find(|c| c.name == *name)
            .expect("validated above");
        lookup_columns.push(Column::new(effective, source_column.sql_type));
    }

    Ok(ExtractPlan {
        fk_column,
        lookup_table,
        source_columns: requested.iter().map(|s| (*s).to_string()).collect(),
        lookup_columns,
    })
}
