//! JSON records
//!
//! Each row becomes one JSON object keyed by column name, in schema order.
//! Null cells and empty collections are left out of the object entirely.

use serde_json::{Map, Value as JsonValue};

use super::{RowMapper, ValueEncoder};
use crate::config::EncoderConfig;
use crate::error::Result;
use crate::types::{ColumnSchema, Row};

/// One JSON object per row
#[derive(Debug, Clone)]
pub struct JsonMapper {
    config: EncoderConfig,
    values: ValueEncoder,
}

impl JsonMapper {
    pub fn new(config: EncoderConfig) -> Self {
        let values = ValueEncoder::new(config.date_format.clone());
        Self { config, values }
    }

    /// Build the object for one row
    pub fn to_object(
        &self,
        schema: &ColumnSchema,
        row: &Row,
        line: Option<u64>,
    ) -> Result<Map<String, JsonValue>> {
        let mut object = Map::with_capacity(schema.len() + 1);
        if let Some(line) = line {
            object.insert("linenumber".to_string(), JsonValue::from(line));
        }

        for (idx, column) in schema.iter().enumerate() {
            let value = row.get(idx);
            if value.collection_len() == Some(0) {
                continue;
            }
            // applies to the column's text values, collection elements included
            let embedded = self.config.is_json_column(&column.name);
            if let Some(json) = self.values.json(&column.name, &column.cql_type, value, embedded)? {
                object.insert(column.name.clone(), json);
            }
        }
        Ok(object)
    }
}

impl RowMapper for JsonMapper {
    fn bind_schema(&self, _schema: &ColumnSchema) -> Result<Option<String>> {
        Ok(None)
    }

    fn encode(&self, schema: &ColumnSchema, row: &Row, line: Option<u64>) -> Result<String> {
        let object = self.to_object(schema, row, line)?;
        Ok(serde_json::to_string(&object)?)
    }
}
