//! Result rows.

use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::column::ColumnSpec;
use super::value::CqlValue;
use crate::error::{DriverError, Result};

/// Column descriptions of a result set, shared by all its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSet {
    columns: Vec<ColumnSpec>,
    column_index: HashMap<String, usize>,
}

impl ColumnSet {
    /// Creates a column set; when names repeat, lookups by name resolve to
    /// the first occurrence.
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        let mut column_index = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            column_index.entry(col.name().to_string()).or_insert(i);
        }
        Self {
            columns,
            column_index,
        }
    }

    /// Creates a column set from bare names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|n| ColumnSpec::from(n.into())).collect())
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the column at `index`.
    pub fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    /// Returns the position of a column; names are case-sensitive.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Iterates over the columns in result order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }
}

/// Something that designates a column: a position or a name.
pub trait ColumnSelector {
    /// Resolves to a column position within `columns`.
    fn resolve(&self, columns: &ColumnSet) -> Option<usize>;
}

impl ColumnSelector for usize {
    fn resolve(&self, columns: &ColumnSet) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }
}

impl ColumnSelector for &str {
    fn resolve(&self, columns: &ColumnSet) -> Option<usize> {
        columns.find(self)
    }
}

impl ColumnSelector for String {
    fn resolve(&self, columns: &ColumnSet) -> Option<usize> {
        columns.find(self)
    }
}

/// A named, ordered collection of column values.
///
/// A column without a value is *undefined*: it is skipped by
/// serialization and `get` returns `None`. An explicit `NULL` is stored as
/// [`CqlValue::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnSet>,
    values: Vec<Option<CqlValue>>,
}

impl Row {
    /// Creates a row where every column is undefined.
    pub fn new(columns: Arc<ColumnSet>) -> Self {
        let values = vec![None; columns.len()];
        Self { columns, values }
    }

    /// Creates a row with values for the leading columns; trailing columns
    /// without a value stay undefined.
    pub fn with_values(columns: Arc<ColumnSet>, values: Vec<CqlValue>) -> Result<Self> {
        Self::with_optional_values(columns, values.into_iter().map(Some).collect())
    }

    /// Creates a row from possibly-undefined values.
    pub fn with_optional_values(
        columns: Arc<ColumnSet>,
        mut values: Vec<Option<CqlValue>>,
    ) -> Result<Self> {
        if values.len() > columns.len() {
            return Err(DriverError::Construction(format!(
                "row has {} values but only {} columns",
                values.len(),
                columns.len()
            )));
        }
        values.resize(columns.len(), None);
        Ok(Self { columns, values })
    }

    /// Returns the value of a column selected by name or position.
    pub fn get<S: ColumnSelector>(&self, selector: S) -> Option<&CqlValue> {
        selector
            .resolve(&self.columns)
            .and_then(|i| self.values.get(i))
            .and_then(Option::as_ref)
    }

    /// Returns the shared column set.
    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    /// Iterates over column names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(ColumnSpec::name)
    }

    /// Iterates over values in column order; `None` marks undefined columns.
    pub fn values(&self) -> impl Iterator<Item = Option<&CqlValue>> {
        self.values.iter().map(Option::as_ref)
    }

    /// Iterates over `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&CqlValue>)> {
        self.keys().zip(self.values())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object of the defined columns.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        // Repeated names keep their first occurrence, as lookups do.
        let entries: Vec<(&str, &CqlValue)> = self
            .iter()
            .enumerate()
            .filter(|(i, (name, _))| self.columns.find(name) == Some(*i))
            .filter_map(|(_, (name, value))| value.map(|v| (name, v)))
            .collect();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (name, value) in entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
