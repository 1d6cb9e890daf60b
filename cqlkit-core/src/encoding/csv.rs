//! CSV records

use ::csv::{QuoteStyle, Terminator, WriterBuilder};

use super::{RowMapper, ValueEncoder};
use crate::config::EncoderConfig;
use crate::error::{Error, Result};
use crate::types::{ColumnSchema, Row};

/// One CSV record per row, RFC 4180 quoting
#[derive(Debug, Clone)]
pub struct CsvMapper {
    config: EncoderConfig,
    values: ValueEncoder,
}

impl CsvMapper {
    pub fn new(config: EncoderConfig) -> Self {
        let values = ValueEncoder::new(config.date_format.clone());
        Self { config, values }
    }

    fn record<I, S>(fields: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .quote_style(QuoteStyle::Necessary)
            .from_writer(Vec::new());
        writer.write_record(fields)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;

        let mut line = String::from_utf8(bytes)
            .map_err(|e| Error::internal(format!("CSV record is not UTF-8: {}", e)))?;
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }
}

impl RowMapper for CsvMapper {
    fn bind_schema(&self, schema: &ColumnSchema) -> Result<Option<String>> {
        if !self.config.header {
            return Ok(None);
        }
        let mut names: Vec<&str> = Vec::with_capacity(schema.len() + 1);
        if self.config.line_numbers {
            names.push("linenumber");
        }
        names.extend(schema.names());
        Self::record(names).map(Some)
    }

    fn encode(&self, schema: &ColumnSchema, row: &Row, line: Option<u64>) -> Result<String> {
        let mut fields = Vec::with_capacity(schema.len() + 1);
        if let Some(line) = line {
            fields.push(line.to_string());
        }
        for (idx, column) in schema.iter().enumerate() {
            let cell = self.values.cell_text(&column.cql_type, row.get(idx))?;
            fields.push(cell.unwrap_or_default());
        }
        Self::record(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn schema() -> ColumnSchema {
        ColumnSchema::parse(&[("id", "int"), ("name", "text"), ("tags", "set<text>")]).unwrap()
    }

    #[test]
    fn test_header_with_line_numbers() {
        let mapper = CsvMapper::new(EncoderConfig {
            line_numbers: true,
            ..EncoderConfig::default()
        });
        assert_eq!(
            mapper.bind_schema(&schema()).unwrap(),
            Some("linenumber,id,name,tags".to_string())
        );
    }

    #[test]
    fn test_header_can_be_suppressed() {
        let mapper = CsvMapper::new(EncoderConfig {
            header: false,
            ..EncoderConfig::default()
        });
        assert_eq!(mapper.bind_schema(&schema()).unwrap(), None);
    }

    #[test]
    fn test_quoting_and_nulls() {
        let mapper = CsvMapper::new(EncoderConfig::default());
        let row = Row::new(vec![
            Value::Int(3),
            Value::from("say \"hi\", bob"),
            Value::Null,
        ]);
        assert_eq!(
            mapper.encode(&schema(), &row, None).unwrap(),
            r#"3,"say ""hi"", bob","#
        );
    }

    #[test]
    fn test_line_number_prefix() {
        let mapper = CsvMapper::new(EncoderConfig::default());
        let row = Row::new(vec![
            Value::Int(1),
            Value::from("x"),
            Value::Set(vec![Value::from("a")]),
        ]);
        assert_eq!(
            mapper.encode(&schema(), &row, Some(7)).unwrap(),
            "7,1,x,{'a'}"
        );
    }

    #[test]
    fn test_embedded_newline_is_quoted() {
        let mapper = CsvMapper::new(EncoderConfig::default());
        let row = Row::new(vec![Value::Int(1), Value::from("a\nb"), Value::Null]);
        assert_eq!(
            mapper.encode(&schema(), &row, None).unwrap(),
            "1,\"a\nb\","
        );
    }
}
