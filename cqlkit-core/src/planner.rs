//! Token-range query planner
//!
//! Splits a full-table request into one bounded sub-query per token
//! sub-range. The generated queries cover the token space exactly once, so
//! executing all of them in any order returns every row exactly once.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

use crate::cluster::{ClusterSession, TokenRange};
use crate::error::{Error, Result};

/// `[keyspace.]table` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub keyspace: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(keyspace: Option<&str>, table: &str) -> Self {
        Self {
            keyspace: keyspace.map(str::to_string),
            table: table.to_string(),
        }
    }

    /// Parse `keyspace.table` or a bare `table`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let (keyspace, table) = match reference.split_once('.') {
            Some((ks, table)) => (Some(normalize_identifier(ks)), normalize_identifier(table)),
            None => (None, normalize_identifier(reference)),
        };
        if table.is_empty() || keyspace.as_deref() == Some("") {
            return Err(Error::argument(format!("Invalid table: {}", reference)));
        }
        Ok(Self { keyspace, table })
    }

    /// Find the table a `select … from [ks.]table` query reads from
    pub fn from_select(query: &str) -> Option<Self> {
        let captures = select_pattern().captures(query)?;
        Some(Self {
            keyspace: captures
                .name("keyspace")
                .map(|m| normalize_identifier(m.as_str())),
            table: normalize_identifier(captures.name("table")?.as_str()),
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.keyspace {
            Some(keyspace) => write!(f, "{}.{}", keyspace, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Name of a keyspace, table or column as the schema stores it
///
/// Quoted identifiers keep their case; unquoted ones fold to lowercase.
pub fn normalize_identifier(identifier: &str) -> String {
    let identifier = identifier.trim();
    match identifier
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => identifier.to_lowercase(),
    }
}

fn select_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?is)^\s*select\s+.+?\s+from\s+(?:(?P<keyspace>"(?:[^"]|"")+"|\w+)\.)?(?P<table>"(?:[^"]|"")+"|\w+)"#,
        )
        .expect("select pattern is valid")
    })
}

fn where_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bwhere\b").expect("where pattern is valid"))
}

/// Quote a column name when CQL would otherwise fold or reject it
pub fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// What a range query enumerates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeQuery {
    /// Split a caller-supplied `select … from [ks.]table` (no WHERE clause)
    Scan(String),
    /// Enumerate the distinct partition keys of a table
    PartitionKeys(TableRef),
}

/// Builds token-bounded sub-queries against a cluster session
pub struct RangePlanner<'a> {
    session: &'a dyn ClusterSession,
}

impl<'a> RangePlanner<'a> {
    pub fn new(session: &'a dyn ClusterSession) -> Self {
        Self { session }
    }

    /// Produce the sub-queries for `request`
    ///
    /// Order carries no meaning; callers treat the result as a task pool.
    pub async fn plan(&self, request: &RangeQuery) -> Result<Vec<String>> {
        let (table, base_query) = match request {
            RangeQuery::Scan(query) => {
                let base = strip_terminator(query);
                if where_pattern().is_match(base) {
                    return Err(Error::invalid_query("WHERE is not allowed in query"));
                }
                let table = TableRef::from_select(base)
                    .ok_or_else(|| Error::invalid_query(format!("Invalid query: {}", query)))?;
                (table, Some(base.to_string()))
            }
            RangeQuery::PartitionKeys(table) => (table.clone(), None),
        };

        let keyspace = self.resolve_keyspace(&table)?;
        let partition_keys = self
            .session
            .partition_key_columns(&keyspace, &table.table)
            .await?;
        if partition_keys.is_empty() {
            return Err(Error::TableNotFound {
                keyspace,
                table: table.table,
            });
        }

        let columns: Vec<String> = partition_keys.iter().map(|c| quote_identifier(c)).collect();
        let base = base_query.unwrap_or_else(|| {
            format!(
                "SELECT DISTINCT {} FROM {}.{}",
                columns.join(", "),
                quote_identifier(&keyspace),
                quote_identifier(&table.table)
            )
        });

        let mut ranges = self.session.token_ranges().await?;
        if ranges.is_empty() {
            ranges.push(TokenRange::full_ring());
        }

        let queries = build_range_queries(&base, &columns, &ranges);
        debug!(
            table = %table,
            ranges = ranges.len(),
            queries = queries.len(),
            "planned token range queries"
        );
        Ok(queries)
    }

    fn resolve_keyspace(&self, table: &TableRef) -> Result<String> {
        table
            .keyspace
            .clone()
            .or_else(|| self.session.active_keyspace())
            .ok_or(Error::NoKeyspace)
    }
}

fn strip_terminator(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim_end()
}

/// One sub-query per unwrapped sub-range of `ranges`
pub fn build_range_queries(base: &str, columns: &[String], ranges: &[TokenRange]) -> Vec<String> {
    let token = format!("token({})", columns.join(", "));
    ranges
        .iter()
        .flat_map(TokenRange::unwrap)
        .map(|sub| {
            format!(
                "{} WHERE {} > {} AND {} <= {}",
                base, token, sub.start, token, sub.end
            )
        })
        .collect()
}
