//! Type-directed value encoding
//!
//! One function per output flavour, each dispatching on the column's logical
//! type: CSV cell text, JSON elements and CQL literals for statement
//! templates.

use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::config::DateFormat;
use crate::error::{Error, Result};
use crate::types::{CqlType, Value};

/// Timestamp spelling inside CQL literals; always UTC so it parses anywhere
const CQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Converts typed cell values into text or JSON
#[derive(Debug, Clone)]
pub struct ValueEncoder {
    date_format: DateFormat,
    literal_date_format: DateFormat,
}

impl ValueEncoder {
    pub fn new(date_format: DateFormat) -> Self {
        Self {
            date_format,
            literal_date_format: DateFormat::utc(CQL_TIMESTAMP_FORMAT)
                .unwrap_or_default(),
        }
    }

    pub fn date_format(&self) -> &DateFormat {
        &self.date_format
    }

    /// CSV cell text; `None` for null cells
    pub fn cell_text(&self, ty: &CqlType, value: &Value) -> Result<Option<String>> {
        let text = match (ty, value) {
            (_, Value::Null) => return Ok(None),
            (CqlType::Ascii | CqlType::Text, Value::Text(s)) => s.clone(),
            (CqlType::Inet, Value::Inet(addr)) => addr.to_string(),
            (CqlType::Timestamp, Value::Timestamp(millis)) => {
                self.date_format.format_millis(*millis)?
            }
            (CqlType::Date, Value::Date(date)) => date.format("%Y-%m-%d").to_string(),
            (CqlType::Time, Value::Time(time)) => time.format("%H:%M:%S%.9f").to_string(),
            // numbers, blobs, uuids and collections share the literal spelling
            _ => self.cql_literal(ty, value)?,
        };
        Ok(Some(text))
    }

    /// JSON element; `None` for null cells
    ///
    /// `embedded` parses text values as JSON documents instead of quoting them.
    pub fn json(
        &self,
        column: &str,
        ty: &CqlType,
        value: &Value,
        embedded: bool,
    ) -> Result<Option<JsonValue>> {
        let json = match (ty, value) {
            (_, Value::Null) => return Ok(None),
            (CqlType::Unsupported(name), _) => return Err(Error::unsupported_type(name)),
            (CqlType::Boolean, Value::Boolean(b)) => JsonValue::Bool(*b),
            (CqlType::TinyInt, Value::TinyInt(v)) => JsonValue::from(*v),
            (CqlType::SmallInt, Value::SmallInt(v)) => JsonValue::from(*v),
            (CqlType::Int, Value::Int(v)) => JsonValue::from(*v),
            (CqlType::BigInt, Value::BigInt(v)) | (CqlType::Counter, Value::Counter(v)) => {
                JsonValue::from(*v)
            }
            (CqlType::Float, Value::Float(v)) => float_json(f64::from(*v)),
            (CqlType::Double, Value::Double(v)) => float_json(*v),
            (CqlType::Varint, Value::Varint(s)) | (CqlType::Decimal, Value::Decimal(s)) => {
                serde_json::Number::from_str(s)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|_| JsonValue::String(s.clone()))
            }
            (CqlType::Ascii | CqlType::Text, Value::Text(s)) => {
                if embedded {
                    serde_json::from_str(s).map_err(|source| Error::InvalidJson {
                        column: column.to_string(),
                        source,
                    })?
                } else {
                    JsonValue::String(s.clone())
                }
            }
            (CqlType::Blob, Value::Blob(bytes)) => JsonValue::String(blob_literal(bytes)),
            (CqlType::Uuid, Value::Uuid(id)) | (CqlType::TimeUuid, Value::TimeUuid(id)) => {
                JsonValue::String(id.to_string())
            }
            (CqlType::Inet, Value::Inet(addr)) => JsonValue::String(addr.to_string()),
            (CqlType::Timestamp, Value::Timestamp(millis)) => {
                JsonValue::String(self.date_format.format_millis(*millis)?)
            }
            (CqlType::Date, Value::Date(date)) => {
                JsonValue::String(date.format("%Y-%m-%d").to_string())
            }
            (CqlType::Time, Value::Time(time)) => {
                JsonValue::String(time.format("%H:%M:%S%.9f").to_string())
            }
            (CqlType::List(elem), Value::List(items)) | (CqlType::Set(elem), Value::Set(items)) => {
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(json) = self.json(column, elem, item, embedded)? {
                        array.push(json);
                    }
                }
                JsonValue::Array(array)
            }
            (CqlType::Map(key_ty, value_ty), Value::Map(entries)) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, item) in entries {
                    let Some(json) = self.json(column, value_ty, item, embedded)? else {
                        continue;
                    };
                    let key = self.cell_text(key_ty, key)?.unwrap_or_default();
                    object.insert(key, json);
                }
                JsonValue::Object(object)
            }
            (ty, value) => return Err(type_mismatch(ty, value)),
        };
        Ok(Some(json))
    }

    /// CQL literal suitable for splicing into a statement
    pub fn cql_literal(&self, ty: &CqlType, value: &Value) -> Result<String> {
        let literal = match (ty, value) {
            (_, Value::Null) => "NULL".to_string(),
            (CqlType::Unsupported(name), _) => return Err(Error::unsupported_type(name)),
            (CqlType::Boolean, Value::Boolean(b)) => b.to_string(),
            (CqlType::TinyInt, Value::TinyInt(v)) => v.to_string(),
            (CqlType::SmallInt, Value::SmallInt(v)) => v.to_string(),
            (CqlType::Int, Value::Int(v)) => v.to_string(),
            (CqlType::BigInt, Value::BigInt(v)) | (CqlType::Counter, Value::Counter(v)) => {
                v.to_string()
            }
            (CqlType::Varint, Value::Varint(s)) | (CqlType::Decimal, Value::Decimal(s)) => s.clone(),
            (CqlType::Float, Value::Float(v)) => float_literal(f64::from(*v), v.to_string()),
            (CqlType::Double, Value::Double(v)) => float_literal(*v, v.to_string()),
            (CqlType::Ascii | CqlType::Text, Value::Text(s)) => quote_string(s),
            (CqlType::Blob, Value::Blob(bytes)) => blob_literal(bytes),
            (CqlType::Uuid, Value::Uuid(id)) | (CqlType::TimeUuid, Value::TimeUuid(id)) => {
                id.to_string()
            }
            (CqlType::Inet, Value::Inet(addr)) => quote_string(&addr.to_string()),
            (CqlType::Timestamp, Value::Timestamp(millis)) => {
                quote_string(&self.literal_date_format.format_millis(*millis)?)
            }
            (CqlType::Date, Value::Date(date)) => format!("'{}'", date.format("%Y-%m-%d")),
            (CqlType::Time, Value::Time(time)) => format!("'{}'", time.format("%H:%M:%S%.9f")),
            (CqlType::List(elem), Value::List(items)) => {
                format!("[{}]", self.join_literals(elem, items)?)
            }
            (CqlType::Set(elem), Value::Set(items)) => {
                format!("{{{}}}", self.join_literals(elem, items)?)
            }
            (CqlType::Map(key_ty, value_ty), Value::Map(entries)) => {
                let mut parts = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    parts.push(format!(
                        "{}: {}",
                        self.cql_literal(key_ty, key)?,
                        self.cql_literal(value_ty, item)?
                    ));
                }
                format!("{{{}}}", parts.join(", "))
            }
            (ty, value) => return Err(type_mismatch(ty, value)),
        };
        Ok(literal)
    }

    fn join_literals(&self, elem: &CqlType, items: &[Value]) -> Result<String> {
        let parts = items
            .iter()
            .map(|item| self.cql_literal(elem, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new(DateFormat::default())
    }
}

fn type_mismatch(ty: &CqlType, value: &Value) -> Error {
    Error::internal(format!("value {:?} does not match column type {}", value, ty))
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn blob_literal(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn float_literal(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        display
    }
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(float_literal(v, v.to_string())))
}
