//! Where the queries of a run come from

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

use cqlkit_core::cluster::ClusterSession;
use cqlkit_core::{RangePlanner, RangeQuery, Result, TableRef};

use crate::cli::SourceArgs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// `-q`: a single query
    Literal(String),
    /// `--query-ranges`: a table scan split over the token ring
    Ranges(String),
    /// `--query-partition-keys`: the distinct partition keys of a table
    PartitionKeys(TableRef),
    /// One query per line of FILE, or of stdin when `None`
    Lines(Option<PathBuf>),
}

impl QuerySource {
    pub fn from_args(args: &SourceArgs) -> Result<Self> {
        if let Some(query) = &args.query {
            return Ok(QuerySource::Literal(query.clone()));
        }
        if let Some(query) = &args.query_ranges {
            return Ok(QuerySource::Ranges(query.clone()));
        }
        if let Some(table) = &args.query_partition_keys {
            return Ok(QuerySource::PartitionKeys(TableRef::parse(table)?));
        }
        Ok(QuerySource::Lines(args.file.clone()))
    }

    /// Queries fanned out over the token ring
    pub fn is_range_query(&self) -> bool {
        matches!(self, QuerySource::Ranges(_) | QuerySource::PartitionKeys(_))
    }

    /// Resolve to the list of queries to execute
    pub async fn queries(&self, session: &dyn ClusterSession) -> Result<Vec<String>> {
        let queries = match self {
            QuerySource::Literal(query) => vec![query.trim().to_string()],
            QuerySource::Ranges(query) => {
                RangePlanner::new(session)
                    .plan(&RangeQuery::Scan(query.clone()))
                    .await?
            }
            QuerySource::PartitionKeys(table) => {
                RangePlanner::new(session)
                    .plan(&RangeQuery::PartitionKeys(table.clone()))
                    .await?
            }
            QuerySource::Lines(Some(path)) => read_lines(BufReader::new(File::open(path)?))?,
            QuerySource::Lines(None) => read_lines(io::stdin().lock())?,
        };
        debug!(count = queries.len(), "resolved queries");
        Ok(queries)
    }
}

/// Trimmed, non-blank lines
pub fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let mut queries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            queries.push(line.to_string());
        }
    }
    Ok(queries)
}
