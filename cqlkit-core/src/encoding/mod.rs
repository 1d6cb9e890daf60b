//! Row encoding
//!
//! A [`RowMapper`] turns rows of a bound [`ColumnSchema`] into output records.
//! The three formats share the same two-step contract: `bind_schema` once per
//! run, then `encode` per row. [`RecordEncoder`] owns the run-wide state
//! around a mapper: the bound schema and the line counter.

pub mod csv;
pub mod json;
pub mod template;
pub mod value;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::EncoderConfig;
use crate::error::{Error, Result};
use crate::sink::OutputSink;
use crate::types::{ColumnSchema, Row};

pub use self::csv::CsvMapper;
pub use self::json::JsonMapper;
pub use self::template::TemplateMapper;
pub use self::value::ValueEncoder;

/// Converts rows of one schema into textual records
pub trait RowMapper: Send + Sync {
    /// Validate `schema` and return the header record, if the format has one
    fn bind_schema(&self, schema: &ColumnSchema) -> Result<Option<String>>;

    /// Encode one row; `line` is set when line numbering is enabled
    fn encode(&self, schema: &ColumnSchema, row: &Row, line: Option<u64>) -> Result<String>;
}

/// Output format, selected once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    /// CQL statement template with positional `?` placeholders
    Cql(String),
}

impl OutputFormat {
    /// Build the mapper for this format
    pub fn mapper(&self, config: &EncoderConfig) -> Result<Box<dyn RowMapper>> {
        let mapper: Box<dyn RowMapper> = match self {
            OutputFormat::Csv => Box::new(CsvMapper::new(config.clone())),
            OutputFormat::Json => Box::new(JsonMapper::new(config.clone())),
            OutputFormat::Cql(template) => Box::new(TemplateMapper::new(template, config.clone())?),
        };
        Ok(mapper)
    }
}

/// Run-wide wrapper around a [`RowMapper`]
///
/// The first schema bound wins; the header is written while the binding lock
/// is held, so no record can reach the sink before it.
pub struct RecordEncoder {
    mapper: Box<dyn RowMapper>,
    line_numbers: bool,
    schema: Mutex<Option<Arc<ColumnSchema>>>,
    next_line: AtomicU64,
}

impl RecordEncoder {
    pub fn new(mapper: Box<dyn RowMapper>, line_numbers: bool) -> Self {
        Self {
            mapper,
            line_numbers,
            schema: Mutex::new(None),
            next_line: AtomicU64::new(1),
        }
    }

    /// Build the encoder for `format`
    pub fn for_format(format: &OutputFormat, config: &EncoderConfig) -> Result<Self> {
        Ok(Self::new(format.mapper(config)?, config.line_numbers))
    }

    /// Bind `schema` for the run, or check it against the one already bound
    pub fn bind(&self, schema: &ColumnSchema, sink: &OutputSink) -> Result<Arc<ColumnSchema>> {
        let mut bound = self.schema.lock();
        if let Some(existing) = bound.as_ref() {
            if existing.as_ref() != schema {
                return Err(Error::schema_mismatch(format!(
                    "expected {} but got {}",
                    existing, schema
                )));
            }
            return Ok(Arc::clone(existing));
        }

        schema.ensure_supported()?;
        if let Some(header) = self.mapper.bind_schema(schema)? {
            sink.write_header(&header)?;
        }
        debug!(schema = %schema, "bound result schema");

        let schema = Arc::new(schema.clone());
        *bound = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Schema bound so far, if any
    pub fn bound_schema(&self) -> Option<Arc<ColumnSchema>> {
        self.schema.lock().clone()
    }

    /// Encode one row of the bound schema
    pub fn encode(&self, schema: &ColumnSchema, row: &Row) -> Result<String> {
        let line = self
            .line_numbers
            .then(|| self.next_line.fetch_add(1, Ordering::SeqCst));
        self.mapper.encode(schema, row, line)
    }

    /// Line numbers handed out so far
    pub fn lines_issued(&self) -> u64 {
        self.next_line.load(Ordering::SeqCst) - 1
    }
}

impl std::fmt::Debug for RecordEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEncoder")
            .field("line_numbers", &self.line_numbers)
            .field("schema", &self.schema.lock())
            .finish_non_exhaustive()
    }
}
