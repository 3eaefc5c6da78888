//! Canonical DDL rendering.
//!
//! The engine renders `CREATE TABLE` statements in one fixed format:
//! three-space indent, bracketed column names, inline PRIMARY KEY for a
//! single-column key, a table-level clause for composite keys, and
//! bare-identifier FOREIGN KEY clauses after the last column. The text
//! is stored verbatim by SQLite, so the format doubles as the schema
//! representation callers read back.

use crate::schema::TableSpec;

/// Quotes an identifier for use in SQL, bracket style.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{name}]")
}

/// Renders the canonical `CREATE TABLE` statement for a spec.
#[must_use]
pub fn create_table_sql(spec: &TableSpec) -> String {
    let inline_pk = spec.primary_key.len() == 1;
    let mut lines = Vec::with_capacity(spec.columns.len() + spec.foreign_keys.len());

    for column in &spec.columns {
        let mut line = format!("   [{}] {}", column.name, column.sql_type.name());
        if inline_pk && spec.primary_key[0] == column.name {
            line.push_str(" PRIMARY KEY");
        }
        if column.notnull {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            line.push_str(" DEFAULT ");
            line.push_str(default);
        }
        lines.push(line);
    }

    if spec.primary_key.len() > 1 {
        let quoted: Vec<String> = spec.primary_key.iter().map(|c| quote_ident(c)).collect();
        lines.push(format!("   PRIMARY KEY ({})", quoted.join(", ")));
    }

    for fk in &spec.foreign_keys {
        lines.push(format!(
            "   FOREIGN KEY({}) REFERENCES {}({})",
            fk.column, fk.other_table, fk.other_column
        ));
    }

    format!("CREATE TABLE [{}] (\n{}\n)", spec.name, lines.join(",\n"))
}
