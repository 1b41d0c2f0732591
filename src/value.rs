use indexmap::IndexMap;
use std::fmt;

/// A dynamically-typed database value, in the spirit of SQLite's storage
/// classes. Equality is structural, not numeric: `Integer(1) != Real(1.0)`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// An opaque, ordered mapping from column name to [`Value`], with
/// value-equality. Cheap to clone so a fetched row can survive the statement
/// cursor that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Row(IndexMap::new())
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Row(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn same_column_set(&self, other: &Row) -> bool {
        self.0.len() == other.0.len() && self.0.keys().all(|k| other.0.contains_key(k))
    }

    /// Columns whose values differ between `self` (the old row) and `other`
    /// (the new row), mapped to the *old* value. Returns `None` when the two
    /// rows expose different column sets: callers must not merge in that case.
    pub fn changed_columns(&self, other: &Row) -> Option<IndexMap<String, Value>> {
        if !self.same_column_set(other) {
            return None;
        }
        let mut changed = IndexMap::new();
        for (column, old_value) in &self.0 {
            let new_value = other.0.get(column).expect("same column set checked above");
            if old_value != new_value {
                changed.insert(column.clone(), old_value.clone());
            }
        }
        Some(changed)
    }
}
