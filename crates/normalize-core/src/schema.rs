//! Schema representation types.
//!
//! These types describe the structure of SQLite tables as seen by the
//! engine: the five-class type domain, columns, foreign keys, and the
//! `TableSpec` handed to the table rewriter.

use serde::{Deserialize, Serialize};

use crate::value::SqlValue;

/// SQLite column types, reduced to the five storage/affinity classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Integer affinity.
    Integer,
    /// Text affinity.
    Text,
    /// Real affinity.
    Real,
    /// Blob (no affinity).
    Blob,
    /// Numeric affinity.
    Numeric,
}

impl SqlType {
    /// Returns the SQL type name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }

    /// Classifies a declared column type by the SQLite affinity rules.
    ///
    /// `INT` anywhere means integer; `CHAR`, `CLOB` or `TEXT` mean
    /// text; an empty declaration or `BLOB` means blob; `REAL`, `FLOA`
    /// or `DOUB` mean real; everything else is numeric.
    #[must_use]
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    /// Infers a column type from a runtime value.
    ///
    /// NULL infers text, so that a column created from an all-NULL
    /// sample still accepts anything later.
    #[must_use]
    pub fn of_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Int(_) => Self::Integer,
            SqlValue::Real(_) => Self::Real,
            SqlValue::Blob(_) => Self::Blob,
            SqlValue::Text(_) | SqlValue::Null => Self::Text,
        }
    }
}

/// Schema of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    pub sql_type: SqlType,
    /// Whether the column carries a NOT NULL constraint.
    pub notnull: bool,
    /// Default value, as raw SQL text.
    pub default: Option<String>,
}

impl Column {
    /// Creates a nullable column with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            notnull: false,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.notnull = true;
        self
    }

    /// Sets the default value SQL text.
    #[must_use]
    pub fn default_sql(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }
}

/// A single-column foreign key constraint.
///
/// Identity is the full 4-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing table.
    pub table: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub other_table: String,
    /// Referenced column.
    pub other_column: String,
}

impl ForeignKey {
    /// Creates a foreign key.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        other_table: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            other_table: other_table.into(),
            other_column: other_column.into(),
        }
    }
}

/// Complete definition of a table to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Column definitions, in order.
    pub columns: Vec<Column>,
    /// Primary key column(s).
    pub primary_key: Vec<String>,
    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSpec {
    /// Creates an empty spec for the named table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Adds a foreign key constraint.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}
