//! Native CQL values.

use std::fmt;
use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use num_bigint::BigInt;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::tuple::Tuple;

/// A CQL `duration`: months, days and nanoseconds are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CqlDuration {
    /// Number of months.
    pub months: i32,
    /// Number of days.
    pub days: i32,
    /// Number of nanoseconds.
    pub nanoseconds: i64,
}

impl fmt::Display for CqlDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.months == 0 && self.days == 0 && self.nanoseconds == 0 {
            return f.write_str("0ns");
        }
        if self.months != 0 {
            write!(f, "{}mo", self.months)?;
        }
        if self.days != 0 {
            write!(f, "{}d", self.days)?;
        }
        if self.nanoseconds != 0 {
            write!(f, "{}ns", self.nanoseconds)?;
        }
        Ok(())
    }
}

/// A value that can appear in a row, a tuple or a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    /// Null value.
    Null,
    /// ASCII string.
    Ascii(String),
    /// UTF-8 string (`text`/`varchar`).
    Text(String),
    /// Boolean.
    Boolean(bool),
    /// 8-bit integer.
    TinyInt(i8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Counter column value.
    Counter(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Arbitrary-precision decimal.
    Decimal(Decimal),
    /// Arbitrary-precision integer.
    Varint(BigInt),
    /// Random UUID.
    Uuid(Uuid),
    /// Time-based UUID.
    TimeUuid(Uuid),
    /// Millisecond timestamp.
    Timestamp(DateTime<Utc>),
    /// Date without time.
    Date(NaiveDate),
    /// Time of day with nanosecond precision.
    Time(NaiveTime),
    /// Duration.
    Duration(CqlDuration),
    /// IPv4 or IPv6 address.
    Inet(IpAddr),
    /// Raw bytes.
    Blob(Bytes),
    /// Ordered list.
    List(Vec<CqlValue>),
    /// Set, kept in server order.
    Set(Vec<CqlValue>),
    /// Map, kept in server order.
    Map(Vec<(CqlValue, CqlValue)>),
    /// Fixed-arity tuple.
    Tuple(Tuple),
    /// User-defined type; `None` fields were not set.
    Udt(Vec<(String, Option<CqlValue>)>),
}

impl CqlValue {
    /// Returns true for [`CqlValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    /// Returns the string content of `ascii` and `text` values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns any integer type that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CqlValue::TinyInt(v) => Some(i64::from(*v)),
            CqlValue::SmallInt(v) => Some(i64::from(*v)),
            CqlValue::Int(v) => Some(i64::from(*v)),
            CqlValue::BigInt(v) | CqlValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the UUID of `uuid` and `timeuuid` values.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Canonical JSON form of the value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn write_joined<'a, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: IntoIterator<Item = &'a CqlValue>,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::Null => f.write_str("null"),
            CqlValue::Ascii(s) | CqlValue::Text(s) => f.write_str(s),
            CqlValue::Boolean(b) => write!(f, "{}", b),
            CqlValue::TinyInt(v) => write!(f, "{}", v),
            CqlValue::SmallInt(v) => write!(f, "{}", v),
            CqlValue::Int(v) => write!(f, "{}", v),
            CqlValue::BigInt(v) | CqlValue::Counter(v) => write!(f, "{}", v),
            CqlValue::Float(v) => write!(f, "{}", v),
            CqlValue::Double(v) => write!(f, "{}", v),
            CqlValue::Decimal(d) => write!(f, "{}", d),
            CqlValue::Varint(v) => write!(f, "{}", v),
            CqlValue::Uuid(u) | CqlValue::TimeUuid(u) => write!(f, "{}", u),
            CqlValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            CqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CqlValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            CqlValue::Duration(d) => write!(f, "{}", d),
            CqlValue::Inet(ip) => write!(f, "{}", ip),
            CqlValue::Blob(bytes) => {
                f.write_str("0x")?;
                for b in bytes.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            CqlValue::List(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            CqlValue::Set(items) => {
                f.write_str("{")?;
                write_joined(f, items)?;
                f.write_str("}")
            }
            CqlValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                f.write_str("}")
            }
            CqlValue::Tuple(t) => write!(f, "{}", t),
            CqlValue::Udt(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match value {
                        Some(v) => write!(f, "{}:{}", name, v)?,
                        None => write!(f, "{}:null", name)?,
                    }
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for CqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CqlValue::Null => serializer.serialize_none(),
            CqlValue::Ascii(s) | CqlValue::Text(s) => serializer.serialize_str(s),
            CqlValue::Boolean(b) => serializer.serialize_bool(*b),
            CqlValue::TinyInt(v) => serializer.serialize_i8(*v),
            CqlValue::SmallInt(v) => serializer.serialize_i16(*v),
            CqlValue::Int(v) => serializer.serialize_i32(*v),
            CqlValue::Float(v) => serializer.serialize_f32(*v),
            CqlValue::Double(v) => serializer.serialize_f64(*v),
            // 64-bit and arbitrary-precision numbers would lose precision as JSON numbers.
            CqlValue::BigInt(_)
            | CqlValue::Counter(_)
            | CqlValue::Decimal(_)
            | CqlValue::Varint(_)
            | CqlValue::Uuid(_)
            | CqlValue::TimeUuid(_)
            | CqlValue::Timestamp(_)
            | CqlValue::Date(_)
            | CqlValue::Time(_)
            | CqlValue::Duration(_)
            | CqlValue::Inet(_) => serializer.collect_str(self),
            CqlValue::Blob(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            CqlValue::List(items) | CqlValue::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CqlValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&k.to_string(), v)?;
                }
                map.end()
            }
            CqlValue::Tuple(t) => t.serialize(serializer),
            CqlValue::Udt(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<&str> for CqlValue {
    fn from(s: &str) -> Self {
        CqlValue::Text(s.to_string())
    }
}

impl From<String> for CqlValue {
    fn from(s: String) -> Self {
        CqlValue::Text(s)
    }
}

impl From<bool> for CqlValue {
    fn from(b: bool) -> Self {
        CqlValue::Boolean(b)
    }
}

impl From<i32> for CqlValue {
    fn from(v: i32) -> Self {
        CqlValue::Int(v)
    }
}

impl From<i64> for CqlValue {
    fn from(v: i64) -> Self {
        CqlValue::BigInt(v)
    }
}

impl From<f64> for CqlValue {
    fn from(v: f64) -> Self {
        CqlValue::Double(v)
    }
}

impl From<Uuid> for CqlValue {
    fn from(u: Uuid) -> Self {
        CqlValue::Uuid(u)
    }
}

impl From<IpAddr> for CqlValue {
    fn from(ip: IpAddr) -> Self {
        CqlValue::Inet(ip)
    }
}

impl From<Decimal> for CqlValue {
    fn from(d: Decimal) -> Self {
        CqlValue::Decimal(d)
    }
}

impl From<BigInt> for CqlValue {
    fn from(v: BigInt) -> Self {
        CqlValue::Varint(v)
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for CqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CqlValue::Null)
    }
}
