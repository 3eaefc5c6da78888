//! SQL cell values, row mappings and deduplication keys.
//!
//! `SqlValue` models the five SQLite storage classes. Rows are ordered
//! column/value mappings so that row equality in tests respects column
//! order. `TupleKey` is the hashable normalized form used by the
//! extract engine's dedup set.

/// A single SQL cell value.
///
/// Integer and real values are distinct variants and never compare
/// equal to each other; text compares byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns true for [`SqlValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Trait for types that can be converted to a [`SqlValue`].
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for i64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(self)
    }
}

impl ToSqlValue for i32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Real(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Real(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

/// One normalized component of a [`TupleKey`].
///
/// Reals are keyed by bit pattern; integers and reals stay distinct
/// even when numerically equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Int(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&SqlValue> for KeyPart {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Int(n) => Self::Int(*n),
            SqlValue::Real(f) => Self::Real(f.to_bits()),
            SqlValue::Text(s) => Self::Text(s.clone()),
            SqlValue::Blob(b) => Self::Blob(b.clone()),
        }
    }
}

/// Hashable key over a tuple of cell values.
///
/// Used as the content address for lookup-row deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleKey(Vec<KeyPart>);

impl TupleKey {
    /// Builds a key from a tuple of values.
    #[must_use]
    pub fn new(values: &[SqlValue]) -> Self {
        Self(values.iter().map(KeyPart::from).collect())
    }
}

/// An ordered mapping from column name to cell value.
///
/// Column order is significant: two rows are equal only when they hold
/// the same columns, in the same order, with equal values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column value, builder style.
    #[must_use]
    pub fn col(mut self, name: impl Into<String>, value: impl ToSqlValue) -> Self {
        self.entries.push((name.into(), value.to_sql_value()));
        self
    }

    /// Appends a column value in place.
    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.entries.push((name.into(), value));
    }

    /// Returns the value of the named column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Returns the column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Returns the values in column order.
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
