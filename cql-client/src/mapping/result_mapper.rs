use std::collections::HashMap;
use std::sync::Arc;

use cql_core::{ColumnSet, CqlValue, Row};
use serde_json::{Map, Value};

use crate::execution::ResultSet;

/// Transforms a column value before it is stored on the model.
pub type ToModelFn = Arc<dyn Fn(Option<&CqlValue>) -> Option<CqlValue> + Send + Sync>;

/// How rows become models.
pub trait MappingInfo: Send + Sync {
    /// The model type.
    type Model;

    /// Creates an empty model.
    fn new_instance(&self) -> Self::Model;

    /// Property name for a column.
    fn property_name(&self, column: &str) -> String;

    /// Optional transform for a column's values.
    fn to_model_fn(&self, _column: &str) -> Option<ToModelFn> {
        None
    }

    /// Stores a value on the model. `None` means the column was not set.
    fn set_property(&self, model: &mut Self::Model, property: &str, value: Option<CqlValue>);
}

/// Column-to-property name conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMapping {
    /// Names are used as is.
    #[default]
    Identity,
    /// `user_id` ↔ `userId`.
    UnderscoreToCamelCase,
}

impl NameMapping {
    /// Property name for `column`.
    pub fn column_to_property(self, column: &str) -> String {
        match self {
            NameMapping::Identity => column.to_string(),
            NameMapping::UnderscoreToCamelCase => {
                let mut out = String::with_capacity(column.len());
                let mut upper = false;
                for c in column.chars() {
                    if c == '_' {
                        upper = true;
                    } else if upper {
                        out.extend(c.to_uppercase());
                        upper = false;
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }

    /// Column name for `property`.
    pub fn property_to_column(self, property: &str) -> String {
        match self {
            NameMapping::Identity => property.to_string(),
            NameMapping::UnderscoreToCamelCase => {
                let mut out = String::with_capacity(property.len() + 4);
                for c in property.chars() {
                    if c.is_uppercase() {
                        out.push('_');
                        out.extend(c.to_lowercase());
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }
}

/// Property names and transforms resolved once for one result-set shape.
pub struct RowAdapter {
    columns: Arc<ColumnSet>,
    properties: Vec<(String, Option<ToModelFn>)>,
}

impl std::fmt::Debug for RowAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.properties.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("RowAdapter")
            .field("properties", &names)
            .finish_non_exhaustive()
    }
}

impl RowAdapter {
    /// Resolves property names and transforms for `columns`.
    pub fn new<M: MappingInfo>(info: &M, columns: Arc<ColumnSet>) -> Self {
        let properties = columns
            .iter()
            .map(|c| (info.property_name(c.name()), info.to_model_fn(c.name())))
            .collect();
        Self {
            columns,
            properties,
        }
    }

    /// The shape this adapter was built for.
    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    /// Builds a model from `row`.
    pub fn adapt<M: MappingInfo>(&self, row: &Row, info: &M) -> M::Model {
        let mut model = info.new_instance();
        for (value, (property, transform)) in row.values().zip(&self.properties) {
            let value = match transform {
                Some(f) => f(value),
                None => value.cloned(),
            };
            info.set_property(&mut model, property, value);
        }
        model
    }
}

/// Maps every row of `result` with one adapter.
pub fn map_rows<M: MappingInfo>(result: &ResultSet, info: &M) -> Vec<M::Model> {
    let adapter = RowAdapter::new(info, Arc::clone(result.columns()));
    result.rows().iter().map(|r| adapter.adapt(r, info)).collect()
}

/// Maps rows to JSON objects.
///
/// Unset columns are skipped; nulls become `null`.
#[derive(Default, Clone)]
pub struct JsonMappingInfo {
    names: NameMapping,
    transforms: HashMap<String, ToModelFn>,
}

impl JsonMappingInfo {
    /// Creates a mapping with the given naming convention.
    pub fn new(names: NameMapping) -> Self {
        Self {
            names,
            transforms: HashMap::new(),
        }
    }

    /// Applies `f` to the values of `column`.
    pub fn with_transform<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<&CqlValue>) -> Option<CqlValue> + Send + Sync + 'static,
    {
        self.transforms.insert(column.into(), Arc::new(f));
        self
    }
}

impl std::fmt::Debug for JsonMappingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonMappingInfo")
            .field("names", &self.names)
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MappingInfo for JsonMappingInfo {
    type Model = Map<String, Value>;

    fn new_instance(&self) -> Self::Model {
        Map::new()
    }

    fn property_name(&self, column: &str) -> String {
        self.names.column_to_property(column)
    }

    fn to_model_fn(&self, column: &str) -> Option<ToModelFn> {
        self.transforms.get(column).cloned()
    }

    fn set_property(&self, model: &mut Self::Model, property: &str, value: Option<CqlValue>) {
        if let Some(value) = value {
            model.insert(property.to_string(), value.to_json());
        }
    }
}
