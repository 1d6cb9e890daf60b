//! Error types for cqlkit

use std::fmt;
use thiserror::Error;

/// Result type alias for cqlkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cqlkit operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors (usually the output sink)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or contradictory arguments
    #[error("Argument error: {0}")]
    Argument(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cluster unreachable or authentication failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Neither the table reference nor the session names a keyspace
    #[error("no keyspace specified")]
    NoKeyspace,

    /// The referenced table does not exist in the keyspace
    #[error("table '{keyspace}.{table}' does not exist")]
    TableNotFound { keyspace: String, table: String },

    /// The query cannot be used the way it was requested
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A statement failed on the cluster
    #[error("Error when execute cql: {query}: {message}")]
    Query {
        query: String,
        message: String,
        retryable: bool,
    },

    /// Column type the encoders do not model
    #[error("The type is not supported now: {0}")]
    UnsupportedType(String),

    /// Template placeholders and result columns disagree
    #[error("Template argument count mismatch! {placeholders} != {columns}")]
    TemplateMismatch { placeholders: usize, columns: usize },

    /// A later result set does not have the schema bound from the first one
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A column registered as embedded JSON holds invalid JSON
    #[error("column '{column}' does not contain valid JSON: {source}")]
    InvalidJson {
        column: String,
        #[source]
        source: serde_json::Error,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an argument error
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create a transient query error that the engine may retry
    pub fn transient(query: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            query: query.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a query error that retrying cannot fix (syntax, invalid request)
    pub fn fatal_query(query: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            query: query.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an unsupported type error
    pub fn unsupported_type(type_name: impl fmt::Display) -> Self {
        Self::UnsupportedType(type_name.to_string())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is recoverable by re-executing the query
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Query { retryable, .. } => *retryable,
            Error::Connection(_) => true,

            Error::Io(_)
            | Error::Csv(_)
            | Error::Json(_)
            | Error::Argument(_)
            | Error::Configuration(_)
            | Error::NoKeyspace
            | Error::TableNotFound { .. }
            | Error::InvalidQuery(_)
            | Error::UnsupportedType(_)
            | Error::TemplateMismatch { .. }
            | Error::SchemaMismatch(_)
            | Error::InvalidJson { .. }
            | Error::Internal(_) => false,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) => ErrorCategory::System,
            Error::Csv(_) | Error::Json(_) | Error::InvalidJson { .. } => ErrorCategory::Data,
            Error::Argument(_) | Error::Configuration(_) => ErrorCategory::Configuration,
            Error::Connection(_) => ErrorCategory::Connection,
            Error::NoKeyspace | Error::TableNotFound { .. } => ErrorCategory::NotFound,
            Error::InvalidQuery(_) | Error::Query { .. } => ErrorCategory::Query,
            Error::UnsupportedType(_)
            | Error::TemplateMismatch { .. }
            | Error::SchemaMismatch(_) => ErrorCategory::Encoding,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O)
    System,
    /// Data-related errors (serialization)
    Data,
    /// Argument and configuration errors
    Configuration,
    /// Cluster connection errors
    Connection,
    /// Keyspace or table not found
    NotFound,
    /// Query-related errors
    Query,
    /// Row encoding errors
    Encoding,
    /// Internal errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::System => "System",
            ErrorCategory::Data => "Data",
            ErrorCategory::Configuration => "Configuration",
            ErrorCategory::Connection => "Connection",
            ErrorCategory::NotFound => "NotFound",
            ErrorCategory::Query => "Query",
            ErrorCategory::Encoding => "Encoding",
            ErrorCategory::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::invalid_query("WHERE is not allowed in query");
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert_eq!(
            err.to_string(),
            "Invalid query: WHERE is not allowed in query"
        );
    }

    #[test]
    fn test_template_mismatch_message() {
        let err = Error::TemplateMismatch {
            placeholders: 2,
            columns: 3,
        };
        assert_eq!(err.to_string(), "Template argument count mismatch! 2 != 3");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::NoKeyspace.category(), ErrorCategory::NotFound);
        assert_eq!(
            Error::unsupported_type("tuple<int, int>").category(),
            ErrorCategory::Encoding
        );
        assert_eq!(
            Error::transient("select 1", "timeout").category(),
            ErrorCategory::Query
        );
    }

    #[test]
    fn test_error_recoverability() {
        assert!(Error::transient("select * from t", "read timeout").is_recoverable());
        assert!(!Error::fatal_query("selec * from t", "syntax error").is_recoverable());
        assert!(!Error::unsupported_type("duration").is_recoverable());
        assert!(!Error::NoKeyspace.is_recoverable());
    }
}
