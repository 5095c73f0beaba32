//! Column metadata.

use std::fmt;

use crate::error::{DriverError, Result};

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// `ascii`
    Ascii,
    /// `text` / `varchar`
    Text,
    /// `boolean`
    Boolean,
    /// `tinyint`
    TinyInt,
    /// `smallint`
    SmallInt,
    /// `int`
    Int,
    /// `bigint`
    BigInt,
    /// `counter`
    Counter,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `decimal`
    Decimal,
    /// `varint`
    Varint,
    /// `uuid`
    Uuid,
    /// `timeuuid`
    TimeUuid,
    /// `timestamp`
    Timestamp,
    /// `date`
    Date,
    /// `time`
    Time,
    /// `duration`
    Duration,
    /// `inet`
    Inet,
    /// `blob`
    Blob,
    /// `list<T>`
    List(Box<ColumnType>),
    /// `set<T>`
    Set(Box<ColumnType>),
    /// `map<K, V>`
    Map(Box<ColumnType>, Box<ColumnType>),
    /// `tuple<...>`
    Tuple(Vec<ColumnType>),
    /// User-defined type with its field types.
    Udt {
        /// Keyspace owning the type.
        keyspace: String,
        /// Type name.
        name: String,
        /// Field names and types in declaration order.
        fields: Vec<(String, ColumnType)>,
    },
    /// Server-side custom type identified by its class name.
    Custom(String),
}

const UNSUPPORTED_CUSTOM_CLASSES: [&str; 3] = [
    "org.apache.cassandra.db.marshal.PointType",
    "org.apache.cassandra.db.marshal.LineStringType",
    "org.apache.cassandra.db.marshal.PolygonType",
];

impl ColumnType {
    /// Rejects types this driver cannot represent as [`CqlValue`](super::CqlValue).
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            ColumnType::Custom(class) => {
                let reason = if UNSUPPORTED_CUSTOM_CLASSES.contains(&class.as_str()) {
                    "geometry types are not supported"
                } else {
                    "custom types are not supported"
                };
                Err(DriverError::UnsupportedOperation(format!(
                    "{}: {}",
                    reason, class
                )))
            }
            ColumnType::List(inner) | ColumnType::Set(inner) => inner.ensure_supported(),
            ColumnType::Map(k, v) => {
                k.ensure_supported()?;
                v.ensure_supported()
            }
            ColumnType::Tuple(types) => types.iter().try_for_each(ColumnType::ensure_supported),
            ColumnType::Udt { fields, .. } => {
                fields.iter().try_for_each(|(_, t)| t.ensure_supported())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Ascii => f.write_str("ascii"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::TinyInt => f.write_str("tinyint"),
            ColumnType::SmallInt => f.write_str("smallint"),
            ColumnType::Int => f.write_str("int"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Counter => f.write_str("counter"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Decimal => f.write_str("decimal"),
            ColumnType::Varint => f.write_str("varint"),
            ColumnType::Uuid => f.write_str("uuid"),
            ColumnType::TimeUuid => f.write_str("timeuuid"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Date => f.write_str("date"),
            ColumnType::Time => f.write_str("time"),
            ColumnType::Duration => f.write_str("duration"),
            ColumnType::Inet => f.write_str("inet"),
            ColumnType::Blob => f.write_str("blob"),
            ColumnType::List(t) => write!(f, "list<{}>", t),
            ColumnType::Set(t) => write!(f, "set<{}>", t),
            ColumnType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            ColumnType::Tuple(types) => {
                f.write_str("tuple<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                f.write_str(">")
            }
            ColumnType::Udt { keyspace, name, .. } => write!(f, "{}.{}", keyspace, name),
            ColumnType::Custom(class) => write!(f, "'{}'", class),
        }
    }
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    name: String,
    column_type: ColumnType,
}

impl ColumnSpec {
    /// Creates a column description.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared column type.
    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }
}

impl From<&str> for ColumnSpec {
    fn from(name: &str) -> Self {
        ColumnSpec::new(name, ColumnType::Text)
    }
}

impl From<String> for ColumnSpec {
    fn from(name: String) -> Self {
        ColumnSpec::new(name, ColumnType::Text)
    }
}
