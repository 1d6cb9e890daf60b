//! Core data types for cqlkit

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Logical column type of a result set column
///
/// The set of variants is closed: every type the encoders know how to render
/// has its own variant, and everything else lands in [`CqlType::Unsupported`]
/// carrying the type's CQL spelling for error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CqlType {
    Ascii,
    Text,
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Counter,
    Varint,
    Float,
    Double,
    Decimal,
    Blob,
    Uuid,
    TimeUuid,
    Inet,
    Timestamp,
    Date,
    Time,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    /// Tuples, user defined types, durations and custom types
    Unsupported(String),
}

impl CqlType {
    /// Parse a CQL type string such as `map<text, frozen<list<int>>>`
    pub fn parse(type_str: &str) -> Result<Self> {
        let type_str = type_str.trim();

        if let Some(inner) = strip_generic(type_str, "frozen") {
            return Self::parse(inner);
        }

        if let Some(inner) = strip_generic(type_str, "list") {
            return Ok(CqlType::List(Box::new(Self::parse(inner)?)));
        }

        if let Some(inner) = strip_generic(type_str, "set") {
            return Ok(CqlType::Set(Box::new(Self::parse(inner)?)));
        }

        if let Some(inner) = strip_generic(type_str, "map") {
            let (key, value) = split_top_level_comma(inner).ok_or_else(|| {
                Error::argument(format!("Invalid map type: {}", type_str))
            })?;
            return Ok(CqlType::Map(
                Box::new(Self::parse(key)?),
                Box::new(Self::parse(value)?),
            ));
        }

        if type_str.is_empty() {
            return Err(Error::argument("Empty type name"));
        }

        let parsed = match type_str.to_lowercase().as_str() {
            "ascii" => CqlType::Ascii,
            "text" | "varchar" => CqlType::Text,
            "boolean" => CqlType::Boolean,
            "tinyint" => CqlType::TinyInt,
            "smallint" => CqlType::SmallInt,
            "int" => CqlType::Int,
            "bigint" => CqlType::BigInt,
            "counter" => CqlType::Counter,
            "varint" => CqlType::Varint,
            "float" => CqlType::Float,
            "double" => CqlType::Double,
            "decimal" => CqlType::Decimal,
            "blob" => CqlType::Blob,
            "uuid" => CqlType::Uuid,
            "timeuuid" => CqlType::TimeUuid,
            "inet" => CqlType::Inet,
            "timestamp" => CqlType::Timestamp,
            "date" => CqlType::Date,
            "time" => CqlType::Time,
            _ => CqlType::Unsupported(type_str.to_string()),
        };
        Ok(parsed)
    }

    /// Find the first type the encoders cannot render, including nested ones
    pub fn unsupported_part(&self) -> Option<&CqlType> {
        match self {
            CqlType::Unsupported(_) => Some(self),
            CqlType::List(inner) | CqlType::Set(inner) => inner.unsupported_part(),
            CqlType::Map(key, value) => key.unsupported_part().or_else(|| value.unsupported_part()),
            _ => None,
        }
    }
}

fn strip_generic<'a>(type_str: &'a str, name: &str) -> Option<&'a str> {
    let prefix_len = name.len();
    let head_matches = type_str
        .get(..prefix_len)
        .map_or(false, |head| head.eq_ignore_ascii_case(name));
    if head_matches
        && type_str.len() > prefix_len + 1
        && type_str[prefix_len..].starts_with('<')
        && type_str.ends_with('>')
    {
        Some(&type_str[prefix_len + 1..type_str.len() - 1])
    } else {
        None
    }
}

fn split_top_level_comma(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (idx, ch) in inner.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((inner[..idx].trim(), inner[idx + 1..].trim())),
            _ => {}
        }
    }
    None
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => write!(f, "ascii"),
            CqlType::Text => write!(f, "text"),
            CqlType::Boolean => write!(f, "boolean"),
            CqlType::TinyInt => write!(f, "tinyint"),
            CqlType::SmallInt => write!(f, "smallint"),
            CqlType::Int => write!(f, "int"),
            CqlType::BigInt => write!(f, "bigint"),
            CqlType::Counter => write!(f, "counter"),
            CqlType::Varint => write!(f, "varint"),
            CqlType::Float => write!(f, "float"),
            CqlType::Double => write!(f, "double"),
            CqlType::Decimal => write!(f, "decimal"),
            CqlType::Blob => write!(f, "blob"),
            CqlType::Uuid => write!(f, "uuid"),
            CqlType::TimeUuid => write!(f, "timeuuid"),
            CqlType::Inet => write!(f, "inet"),
            CqlType::Timestamp => write!(f, "timestamp"),
            CqlType::Date => write!(f, "date"),
            CqlType::Time => write!(f, "time"),
            CqlType::List(inner) => write!(f, "list<{}>", inner),
            CqlType::Set(inner) => write!(f, "set<{}>", inner),
            CqlType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            CqlType::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// Runtime cell value as delivered by a cluster session
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    /// Arbitrary precision integer in its canonical decimal spelling
    Varint(String),
    Float(f32),
    Double(f64),
    /// Arbitrary precision decimal in its canonical spelling
    Decimal(String),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    TimeUuid(Uuid),
    Inet(IpAddr),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    Date(NaiveDate),
    Time(NaiveTime),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Number of elements for collections, `None` for scalars
    pub fn collection_len(&self) -> Option<usize> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

/// Name and logical type of one result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub cql_type: CqlType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
        }
    }
}

/// Ordered column description of a result set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Build a schema from `(name, "cql type")` pairs
    pub fn parse(columns: &[(&str, &str)]) -> Result<Self> {
        let columns = columns
            .iter()
            .map(|(name, ty)| Ok(ColumnSpec::new(*name, CqlType::parse(ty)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnSpec> {
        self.columns.iter()
    }

    /// Reject schemas containing a column type no encoder can render
    pub fn ensure_supported(&self) -> Result<()> {
        for column in &self.columns {
            if let Some(unsupported) = column.cql_type.unsupported_part() {
                return Err(Error::unsupported_type(format!(
                    "{} (column '{}')",
                    unsupported, column.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", column.name, column.cql_type)?;
        }
        write!(f, ")")
    }
}

/// One result row, cells in schema order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&Value::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive_types() {
        assert_eq!(CqlType::parse("text").unwrap(), CqlType::Text);
        assert_eq!(CqlType::parse("VARCHAR").unwrap(), CqlType::Text);
        assert_eq!(CqlType::parse("timeuuid").unwrap(), CqlType::TimeUuid);
        assert_eq!(
            CqlType::parse("duration").unwrap(),
            CqlType::Unsupported("duration".to_string())
        );
    }

    #[test]
    fn test_parse_nested_collections() {
        let parsed = CqlType::parse("map<text, frozen<list<int>>>").unwrap();
        assert_eq!(
            parsed,
            CqlType::Map(
                Box::new(CqlType::Text),
                Box::new(CqlType::List(Box::new(CqlType::Int)))
            )
        );
        assert_eq!(parsed.to_string(), "map<text, list<int>>");
    }

    #[test]
    fn test_unsupported_part_is_found_inside_collections() {
        let ty = CqlType::parse("list<frozen<tuple<int, text>>>").unwrap();
        assert_eq!(
            ty.unsupported_part(),
            Some(&CqlType::Unsupported("tuple<int, text>".to_string()))
        );
        assert!(CqlType::parse("set<inet>").unwrap().unsupported_part().is_none());
    }

    #[test]
    fn test_schema_rejects_unsupported_columns() {
        let schema = ColumnSchema::parse(&[("id", "int"), ("address", "frozen<address_udt>")])
            .unwrap();
        let err = schema.ensure_supported().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_row_get_out_of_range_is_null() {
        let row = Row::new(vec![Value::Int(1)]);
        assert_eq!(row.get(0), &Value::Int(1));
        assert!(row.get(5).is_null());
    }
}
