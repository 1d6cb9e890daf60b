//! CQL statement records
//!
//! Every `?` in the template is replaced, left to right, by the CQL literal of
//! the corresponding column. The placeholder count must match the column
//! count of the bound schema.

use super::{RowMapper, ValueEncoder};
use crate::config::EncoderConfig;
use crate::error::{Error, Result};
use crate::types::{ColumnSchema, Row};

/// One rendered statement per row
#[derive(Debug, Clone)]
pub struct TemplateMapper {
    /// Literal text around the placeholders; always one more than placeholders
    segments: Vec<String>,
    values: ValueEncoder,
}

impl TemplateMapper {
    pub fn new(template: &str, config: EncoderConfig) -> Result<Self> {
        if template.trim().is_empty() {
            return Err(Error::argument("Template not specified"));
        }
        Ok(Self {
            segments: template.split('?').map(str::to_string).collect(),
            values: ValueEncoder::new(config.date_format),
        })
    }

    pub fn placeholders(&self) -> usize {
        self.segments.len() - 1
    }
}

impl RowMapper for TemplateMapper {
    fn bind_schema(&self, schema: &ColumnSchema) -> Result<Option<String>> {
        if self.placeholders() != schema.len() {
            return Err(Error::TemplateMismatch {
                placeholders: self.placeholders(),
                columns: schema.len(),
            });
        }
        Ok(None)
    }

    fn encode(&self, schema: &ColumnSchema, row: &Row, _line: Option<u64>) -> Result<String> {
        let mut statement = String::with_capacity(self.segments.iter().map(String::len).sum());
        for (idx, segment) in self.segments.iter().enumerate() {
            statement.push_str(segment);
            if let Some(column) = schema.columns().get(idx) {
                statement.push_str(&self.values.cql_literal(&column.cql_type, row.get(idx))?);
            }
        }
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn schema() -> ColumnSchema {
        ColumnSchema::parse(&[("id", "int"), ("name", "text"), ("tags", "list<text>")]).unwrap()
    }

    #[test]
    fn test_placeholder_count_must_match() {
        let mapper = TemplateMapper::new(
            "INSERT INTO t (id, name) VALUES (?, ?)",
            EncoderConfig::default(),
        )
        .unwrap();
        let err = mapper.bind_schema(&schema()).unwrap_err();
        assert_eq!(err.to_string(), "Template argument count mismatch! 2 != 3");
    }

    #[test]
    fn test_statement_rendering() {
        let mapper = TemplateMapper::new(
            "INSERT INTO t (id, name, tags) VALUES (?, ?, ?);",
            EncoderConfig::default(),
        )
        .unwrap();
        assert_eq!(mapper.bind_schema(&schema()).unwrap(), None);

        let row = Row::new(vec![
            Value::Int(1),
            Value::from("O'Brien"),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        ]);
        assert_eq!(
            mapper.encode(&schema(), &row, Some(1)).unwrap(),
            "INSERT INTO t (id, name, tags) VALUES (1, 'O''Brien', ['a', 'b']);"
        );
    }

    #[test]
    fn test_null_renders_as_keyword() {
        let mapper =
            TemplateMapper::new("UPDATE t SET name = ? WHERE id = ? AND x = ?", EncoderConfig::default())
                .unwrap();
        let row = Row::new(vec![Value::Int(5), Value::Null, Value::Null]);
        assert_eq!(
            mapper.encode(&schema(), &row, None).unwrap(),
            "UPDATE t SET name = 5 WHERE id = NULL AND x = NULL"
        );
    }

    #[test]
    fn test_empty_template_is_rejected() {
        assert!(TemplateMapper::new("  ", EncoderConfig::default()).is_err());
    }
}
