//! Structured-column expansion.
//!
//! `Table::extract_expand` decodes a column of serialized payloads and
//! normalizes it into related tables. The strategy is chosen from the
//! first decoded payload and enforced across the column:
//!
//! - object: 1:N replacement through a lookup-style destination, the
//!   source column becomes a foreign key
//! - scalar array: N:1 child rows pointing back at the source row
//! - object array: M:N through a junction table
//!
//! NULL cells and empty arrays are permitted and produce a NULL foreign
//! key or zero related rows.

use std::collections::HashMap;

use normalize_core::ddl::{self, quote_ident};
use normalize_core::{Column, ForeignKey, SqlType, SqlValue, TableSpec, TupleKey};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::info;

use crate::database::{add_table_column, execute_with, fetch_all_with, Table};
use crate::error::{NormalizeError, Result};
use crate::extract::get_or_create_lookup_id;
use crate::introspect;
use crate::rewrite::{apply_rewrite, drop_column, TableRewrite};

/// Decoded payload shape consumed by the expand engine.
///
/// Object key order is preserved and drives destination column order.
pub type Payload = Value;

/// Default payload decoder: JSON via serde.
pub fn json_decode(raw: &str) -> serde_json::Result<Payload> {
    serde_json::from_str(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Object,
    ScalarArray,
    ObjectArray,
    /// Only empty arrays were seen; there is nothing to normalize.
    UndeterminedArray,
}

impl Table {
    /// Expands a column of structured payloads into related tables.
    ///
    /// `decode` maps the raw text cell to a [`Payload`]; `table` names
    /// the destination and `pk` its primary key column. The operation
    /// runs in one engine-opened transaction.
    pub async fn extract_expand<F>(
        &self,
        column: &str,
        decode: F,
        table: &str,
        pk: &str,
    ) -> Result<()>
    where
        F: Fn(&str) -> serde_json::Result<Payload>,
    {
        let mut tx = self.pool().begin().await?;
        execute_with(&mut tx, "PRAGMA defer_foreign_keys = ON", vec![]).await?;

        if !introspect::table_exists(&mut tx, self.name()).await? {
            return Err(NormalizeError::TableNotFound(self.name().to_string()));
        }
        let source_info = introspect::table_info(&mut tx, self.name()).await?;
        if !source_info.columns.iter().any(|c| c.name == column) {
            return Err(NormalizeError::InvalidColumns(format!(
                "no such column: {column}"
            )));
        }
        if source_info.primary_key.len() > 1 {
            return Err(NormalizeError::InvalidColumns(format!(
                "cannot expand {}: composite primary key",
                self.name()
            )));
        }
        let src_pk = source_info
            .primary_key
            .first()
            .cloned()
            .unwrap_or_else(|| "rowid".to_string());

        let scan_sql = format!(
            "SELECT {}, {} FROM {}",
            quote_ident(&src_pk),
            quote_ident(column),
            quote_ident(self.name())
        );
        let rows = fetch_all_with(&mut tx, &scan_sql, vec![]).await?;
        let mut payloads: Vec<(SqlValue, Option<Payload>)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = row.values().cloned();
            let src_id = values.next().unwrap_or(SqlValue::Null);
            let payload = match values.next().unwrap_or(SqlValue::Null) {
                SqlValue::Null => None,
                SqlValue::Text(raw) => Some(decode(&raw)?),
                other => return Err(mismatch(column, "a text payload", storage_name(&other))),
            };
            payloads.push((src_id, payload));
        }

        let Some(strategy) = classify(column, &payloads)? else {
            tx.commit().await?;
            return Ok(());
        };
        info!(
            table = %self.name(),
            column = %column,
            destination = %table,
            strategy = ?strategy,
            "expanding column"
        );
        match strategy {
            Strategy::UndeterminedArray => {}
            Strategy::Object => {
                expand_object(&mut tx, self.name(), &src_pk, column, table, pk, &payloads).await?;
            }
            Strategy::ScalarArray => {
                expand_scalar_array(&mut tx, self.name(), &src_pk, column, table, pk, &payloads)
                    .await?;
            }
            Strategy::ObjectArray => {
                expand_object_array(&mut tx, self.name(), &src_pk, column, table, pk, &payloads)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Chooses the strategy from the first decoded payload and validates
/// every other payload against it before any write happens.
fn classify(
    column: &str,
    payloads: &[(SqlValue, Option<Payload>)],
) -> Result<Option<Strategy>> {
    let mut strategy: Option<Strategy> = None;
    for (_, payload) in payloads {
        let Some(payload) = payload else { continue };
        match payload {
            Value::Object(_) => match strategy {
                None => strategy = Some(Strategy::Object),
                Some(Strategy::Object) => {}
                Some(_) => return Err(mismatch(column, "an array", "an object")),
            },
            Value::Array(items) => {
                if strategy == Some(Strategy::Object) {
                    return Err(mismatch(column, "an object", "an array"));
                }
                let kind = array_kind(column, items)?;
                strategy = match (strategy, kind) {
                    (current, None) => current.or(Some(Strategy::UndeterminedArray)),
                    (None | Some(Strategy::UndeterminedArray), Some(kind)) => Some(kind),
                    (Some(current), Some(kind)) if current == kind => Some(current),
                    (Some(Strategy::ScalarArray), Some(_)) => {
                        return Err(mismatch(column, "a scalar array", "an object array"));
                    }
                    (Some(_), Some(_)) => {
                        return Err(mismatch(column, "an object array", "a scalar array"));
                    }
                };
            }
            _ => return Err(mismatch(column, "an object or array", "a scalar")),
        }
    }
    Ok(strategy)
}

fn array_kind(column: &str, items: &[Value]) -> Result<Option<Strategy>> {
    let mut kind: Option<Strategy> = None;
    for item in items {
        let item_kind = match item {
            Value::Object(_) => Strategy::ObjectArray,
            Value::Array(_) => {
                return Err(mismatch(column, "scalar or object elements", "a nested array"));
            }
            _ => Strategy::ScalarArray,
        };
        match kind {
            None => kind = Some(item_kind),
            Some(current) if current == item_kind => {}
            Some(_) => return Err(mismatch(column, "uniform array elements", "mixed elements")),
        }
    }
    Ok(kind)
}

/// Object payloads: destination rows keyed by the payload's own
/// primary key when present, lookup-style dedup otherwise; the source
/// column is replaced by a foreign key named `<column>_id`.
async fn expand_object(
    conn: &mut SqliteConnection,
    source: &str,
    src_pk: &str,
    column: &str,
    destination: &str,
    pk: &str,
    payloads: &[(SqlValue, Option<Payload>)],
) -> Result<()> {
    let fk_column = format!("{column}_id");
    let info = introspect::table_info(conn, source).await?;
    if info.columns.iter().any(|c| c.name == fk_column) {
        return Err(NormalizeError::InvalidColumns(format!(
            "column {fk_column} already exists on {source}"
        )));
    }
    let Some(first) = payloads
        .iter()
        .find_map(|(_, p)| p.as_ref().and_then(Value::as_object))
    else {
        return Ok(());
    };
    let mut dest_columns = ensure_destination(conn, destination, pk, first).await?;

    // Hold the resolved ids in a working column; the rewrite below
    // moves them into the payload column's position under the fk name.
    let tmp = working_column_name(&info.columns, &fk_column);
    add_table_column(conn, source, &tmp, SqlType::Integer).await?;
    let update_sql = format!(
        "UPDATE {} SET {} = ? WHERE {} IS ?",
        quote_ident(source),
        quote_ident(&tmp),
        quote_ident(src_pk)
    );

    let mut seen: HashMap<TupleKey, i64> = HashMap::new();
    for (src_id, payload) in payloads {
        let Some(payload) = payload else { continue };
        let Some(object) = payload.as_object() else {
            return Err(mismatch(column, "an object", "an array"));
        };
        sync_destination_columns(conn, destination, &mut dest_columns, object).await?;
        let id = upsert_object(conn, destination, pk, object, &mut seen).await?;
        execute_with(conn, &update_sql, vec![id, src_id.clone()]).await?;
    }

    let info = introspect::table_info(conn, source).await?;
    let fks = introspect::foreign_keys(conn, source).await?;
    let rowid_table = info.primary_key.is_empty();
    let mut columns = Vec::new();
    let mut projection = Vec::new();
    if rowid_table {
        columns.push(Column::new("rowid", SqlType::Integer));
        projection.push("[rowid]".to_string());
    }
    for col in &info.columns {
        if col.name == column {
            columns.push(Column::new(&fk_column, SqlType::Integer));
            projection.push(quote_ident(&tmp));
        } else if col.name == tmp {
            continue;
        } else {
            columns.push(col.clone());
            projection.push(quote_ident(&col.name));
        }
    }
    let mut foreign_keys: Vec<ForeignKey> = fks
        .iter()
        .filter(|fk| fk.column != column && fk.column != tmp)
        .cloned()
        .collect();
    foreign_keys.push(ForeignKey::new(source, &fk_column, destination, pk));
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

/// Scalar-array payloads: one child row per element, foreign key back
/// to the source row; the source column is dropped.
async fn expand_scalar_array(
    conn: &mut SqliteConnection,
    source: &str,
    src_pk: &str,
    column: &str,
    destination: &str,
    pk: &str,
    payloads: &[(SqlValue, Option<Payload>)],
) -> Result<()> {
    let child_fk = format!("{source}_id");
    let value_type = payloads
        .iter()
        .filter_map(|(_, p)| p.as_ref().and_then(Value::as_array))
        .flat_map(|items| items.iter())
        .next()
        .map_or(SqlType::Text, json_type);

    let dest_exists = introspect::table_exists(conn, destination).await?;
    if dest_exists {
        let info = introspect::table_info(conn, destination).await?;
        for required in [pk, child_fk.as_str(), "value"] {
            if !info.columns.iter().any(|c| c.name == required) {
                return Err(NormalizeError::InvalidColumns(format!(
                    "table {destination} exists but has no column {required}"
                )));
            }
        }
    }

    // The payloads are already in memory, so the source is rewritten
    // first; child rows then reference the final table instead of one
    // the rewrite is about to drop.
    drop_column(conn, source, column).await?;

    if !dest_exists {
        let spec = TableSpec::new(destination)
            .column(Column::new(pk, SqlType::Integer))
            .column(Column::new(&child_fk, SqlType::Integer))
            .column(Column::new("value", value_type))
            .primary_key(vec![pk.to_string()])
            .foreign_key(ForeignKey::new(destination, &child_fk, source, src_pk));
        execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;
    }

    let insert_sql = format!(
        "INSERT INTO {} ({}, [value]) VALUES (?, ?)",
        quote_ident(destination),
        quote_ident(&child_fk)
    );
    for (src_id, payload) in payloads {
        let Some(payload) = payload else { continue };
        let Some(items) = payload.as_array() else {
            return Err(mismatch(column, "a scalar array", "an object"));
        };
        for item in items {
            execute_with(conn, &insert_sql, vec![src_id.clone(), json_to_sql(item)]).await?;
        }
    }
    Ok(())
}

/// Object-array payloads: destination rows plus a junction table named
/// `<destination>_<source>` carrying both foreign keys; the source
/// column is dropped.
async fn expand_object_array(
    conn: &mut SqliteConnection,
    source: &str,
    src_pk: &str,
    column: &str,
    destination: &str,
    pk: &str,
    payloads: &[(SqlValue, Option<Payload>)],
) -> Result<()> {
    let Some(first) = payloads
        .iter()
        .filter_map(|(_, p)| p.as_ref().and_then(Value::as_array))
        .flat_map(|items| items.iter())
        .find_map(Value::as_object)
    else {
        return Ok(());
    };

    let mut dest_columns = ensure_destination(conn, destination, pk, first).await?;

    let junction = format!("{destination}_{source}");
    let src_fk = format!("{source}_id");
    let dest_fk = format!("{destination}_id");
    let junction_exists = introspect::table_exists(conn, &junction).await?;
    if junction_exists {
        let info = introspect::table_info(conn, &junction).await?;
        for required in [src_fk.as_str(), dest_fk.as_str()] {
            if !info.columns.iter().any(|c| c.name == required) {
                return Err(NormalizeError::InvalidColumns(format!(
                    "junction table {junction} exists but has no column {required}"
                )));
            }
        }
    }

    // Rewrite the source before linking; junction rows then reference
    // the final table instead of one the rewrite is about to drop.
    drop_column(conn, source, column).await?;

    if !junction_exists {
        let spec = TableSpec::new(&junction)
            .column(Column::new(&src_fk, SqlType::Integer))
            .column(Column::new(&dest_fk, SqlType::Integer))
            .foreign_key(ForeignKey::new(&junction, &src_fk, source, src_pk))
            .foreign_key(ForeignKey::new(&junction, &dest_fk, destination, pk));
        execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;
    }

    let link_sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
        quote_ident(&junction),
        quote_ident(&src_fk),
        quote_ident(&dest_fk)
    );
    let mut seen: HashMap<TupleKey, i64> = HashMap::new();
    for (src_id, payload) in payloads {
        let Some(payload) = payload else { continue };
        let Some(items) = payload.as_array() else {
            return Err(mismatch(column, "an object array", "an object"));
        };
        for item in items {
            let Some(object) = item.as_object() else {
                return Err(mismatch(column, "object elements", "a scalar"));
            };
            sync_destination_columns(conn, destination, &mut dest_columns, object).await?;
            let id = upsert_object(conn, destination, pk, object, &mut seen).await?;
            execute_with(conn, &link_sql, vec![src_id.clone(), id]).await?;
        }
    }
    Ok(())
}

/// Writes one object into the destination table and returns its id.
///
/// With an explicit primary key field the id is taken from the payload
/// and the row is upserted; otherwise the object dedups through the
/// same get-or-insert path the extract engine uses.
async fn upsert_object(
    conn: &mut SqliteConnection,
    destination: &str,
    pk: &str,
    object: &Map<String, Value>,
    seen: &mut HashMap<TupleKey, i64>,
) -> Result<SqlValue> {
    let columns: Vec<String> = object.keys().cloned().collect();
    let values: Vec<SqlValue> = object.values().map(json_to_sql).collect();

    if let Some(pk_value) = object.get(pk) {
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != pk)
            .map(|c| format!("{} = excluded.{}", quote_ident(c), quote_ident(c)))
            .collect();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT({}) {conflict}",
            quote_ident(destination),
            quoted.join(", "),
            quote_ident(pk)
        );
        execute_with(conn, &sql, values).await?;
        return Ok(json_to_sql(pk_value));
    }

    // Key on names and values together so {a: 1} and {b: 1} stay apart.
    let mut key_parts: Vec<SqlValue> = columns
        .iter()
        .map(|c| SqlValue::Text(c.clone()))
        .collect();
    key_parts.extend(values.iter().cloned());
    let key = TupleKey::new(&key_parts);
    if let Some(id) = seen.get(&key) {
        return Ok(SqlValue::Int(*id));
    }
    let id = get_or_create_lookup_id(conn, destination, &columns, &values).await?;
    seen.insert(key, id);
    Ok(SqlValue::Int(id))
}

/// Creates the destination table from the first object's keys, or
/// verifies an existing one has the expected primary key.
async fn ensure_destination(
    conn: &mut SqliteConnection,
    destination: &str,
    pk: &str,
    first: &Map<String, Value>,
) -> Result<Vec<String>> {
    if introspect::table_exists(conn, destination).await? {
        let info = introspect::table_info(conn, destination).await?;
        if info.primary_key != [pk] {
            return Err(NormalizeError::InvalidColumns(format!(
                "table {destination} exists but its primary key is not {pk}"
            )));
        }
        return Ok(info.columns.into_iter().map(|c| c.name).collect());
    }

    let mut spec = TableSpec::new(destination);
    if !first.contains_key(pk) {
        spec = spec.column(Column::new(pk, SqlType::Integer));
    }
    for (key, value) in first {
        spec = spec.column(Column::new(key, json_type(value)));
    }
    spec = spec.primary_key(vec![pk.to_string()]);
    execute_with(conn, &ddl::create_table_sql(&spec), vec![]).await?;
    Ok(spec.columns.iter().map(|c| c.name.clone()).collect())
}

/// Adds destination columns for object keys not seen before.
async fn sync_destination_columns(
    conn: &mut SqliteConnection,
    destination: &str,
    existing: &mut Vec<String>,
    object: &Map<String, Value>,
) -> Result<()> {
    for (key, value) in object {
        if !existing.iter().any(|c| c == key) {
            add_table_column(conn, destination, key, json_type(value)).await?;
            existing.push(key.clone());
        }
    }
    Ok(())
}

fn working_column_name(columns: &[Column], base: &str) -> String {
    let mut candidate = format!("{base}_tmp");
    let mut suffix = 1;
    while columns.iter().any(|c| c.name == candidate) {
        suffix += 1;
        candidate = format!("{base}_tmp_{suffix}");
    }
    candidate
}

/// Converts a payload value to a cell value. Containers are stored as
/// their JSON text.
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Int)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn json_type(value: &Value) -> SqlType {
    match value {
        Value::Bool(_) => SqlType::Integer,
        Value::Number(n) if n.is_i64() || n.is_u64() => SqlType::Integer,
        Value::Number(_) => SqlType::Real,
        _ => SqlType::Text,
    }
}

fn storage_name(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "a null",
        SqlValue::Int(_) => "an integer",
        SqlValue::Real(_) => "a real",
        SqlValue::Text(_) => "text",
        SqlValue::Blob(_) => "a blob",
    }
}

fn mismatch(column: &str, expected: &'static str, found: &'static str) -> NormalizeError {
    NormalizeError::ShapeMismatch {
        column: column.to_string(),
        expected,
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payloads(values: Vec<Option<Value>>) -> Vec<(SqlValue, Option<Payload>)> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, p)| (SqlValue::Int(i as i64 + 1), p))
            .collect()
    }

    #[test]
    fn test_classify_object() {
        let p = payloads(vec![None, Some(json!({"id": 5})), Some(json!({"id": 6}))]);
        assert_eq!(classify("c", &p).unwrap(), Some(Strategy::Object));
    }

    #[test]
    fn test_classify_scalar_and_object_arrays() {
        let scalars = payloads(vec![Some(json!(["Palm", "Arecaceae"]))]);
        assert_eq!(classify("c", &scalars).unwrap(), Some(Strategy::ScalarArray));

        let objects = payloads(vec![Some(json!([{"id": 1}, {"id": 2}]))]);
        assert_eq!(classify("c", &objects).unwrap(), Some(Strategy::ObjectArray));
    }

    #[test]
    fn test_classify_empty_arrays_narrow_later() {
        let p = payloads(vec![Some(json!([])), Some(json!(["x"]))]);
        assert_eq!(classify("c", &p).unwrap(), Some(Strategy::ScalarArray));

        let only_empty = payloads(vec![Some(json!([])), None]);
        assert_eq!(
            classify("c", &only_empty).unwrap(),
            Some(Strategy::UndeterminedArray)
        );

        let nothing = payloads(vec![None, None]);
        assert_eq!(classify("c", &nothing).unwrap(), None);
    }

    #[test]
    fn test_classify_rejects_mixed_shapes() {
        let object_then_array = payloads(vec![Some(json!({"a": 1})), Some(json!([1]))]);
        assert!(matches!(
            classify("c", &object_then_array),
            Err(NormalizeError::ShapeMismatch { .. })
        ));

        let mixed_elements = payloads(vec![Some(json!([1, {"a": 1}]))]);
        assert!(matches!(
            classify("c", &mixed_elements),
            Err(NormalizeError::ShapeMismatch { .. })
        ));

        let top_level_scalar = payloads(vec![Some(json!(42))]);
        assert!(matches!(
            classify("c", &top_level_scalar),
            Err(NormalizeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_json_to_sql() {
        assert_eq!(json_to_sql(&json!(5)), SqlValue::Int(5));
        assert_eq!(json_to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(json_to_sql(&json!(true)), SqlValue::Int(1));
        assert_eq!(json_to_sql(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(json_to_sql(&json!(null)), SqlValue::Null);
        assert_eq!(
            json_to_sql(&json!({"a": 1})),
            SqlValue::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_json_type() {
        assert_eq!(json_type(&json!(5)), SqlType::Integer);
        assert_eq!(json_type(&json!(2.5)), SqlType::Real);
        assert_eq!(json_type(&json!("x")), SqlType::Text);
        assert_eq!(json_type(&json!(false)), SqlType::Integer);
    }

    #[test]
    fn test_working_column_name_avoids_collisions() {
        let columns = vec![
            Column::new("species_id_tmp", SqlType::Integer),
            Column::new("x", SqlType::Text),
        ];
        assert_eq!(
            working_column_name(&columns, "species_id"),
            "species_id_tmp_2"
        );
    }
}
