//! In-memory cluster session
//!
//! Serves canned result sets keyed by query text, answers metadata lookups
//! from registered tables and a token ring, and can inject failures. Useful
//! for exercising the engine without a running cluster.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ClusterSession, ResultSet, TokenRange, TokenRing};
use crate::config::Consistency;
use crate::error::{Error, Result};
use crate::types::{ColumnSchema, Row};

#[derive(Debug, Clone)]
struct CannedResult {
    columns: ColumnSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    remaining: u32,
    retryable: bool,
}

/// Deterministic [`ClusterSession`] backed by in-memory data
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    keyspace: Option<String>,
    tables: HashMap<(String, String), Vec<String>>,
    ring: TokenRing,
    results: HashMap<String, CannedResult>,
    default_result: Option<CannedResult>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    stream_faults: Mutex<HashMap<String, usize>>,
    executed: Mutex<Vec<String>>,
    attempts: AtomicUsize,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyspace reported as active
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Register a table and its partition key columns
    pub fn with_table(mut self, keyspace: &str, table: &str, partition_keys: &[&str]) -> Self {
        self.tables.insert(
            (keyspace.to_string(), table.to_string()),
            partition_keys.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Node tokens forming the ring
    pub fn with_tokens(mut self, tokens: Vec<i64>) -> Self {
        self.ring = TokenRing::new(tokens);
        self
    }

    /// Result returned for exactly this (trimmed) query text
    pub fn with_result(mut self, query: &str, columns: ColumnSchema, rows: Vec<Row>) -> Self {
        self.results
            .insert(query.trim().to_string(), CannedResult { columns, rows });
        self
    }

    /// Result returned for any query without a registered result
    pub fn with_default_result(mut self, columns: ColumnSchema, rows: Vec<Row>) -> Self {
        self.default_result = Some(CannedResult { columns, rows });
        self
    }

    /// Make the next `times` executions of `query` fail before returning rows
    pub fn fail_next(&self, query: &str, times: u32, retryable: bool) {
        self.failures.lock().insert(
            query.trim().to_string(),
            InjectedFailure {
                remaining: times,
                retryable,
            },
        );
    }

    /// Make the next execution of `query` break after streaming `after_rows` rows
    pub fn fail_stream_once(&self, query: &str, after_rows: usize) {
        self.stream_faults
            .lock()
            .insert(query.trim().to_string(), after_rows);
    }

    /// Successfully started executions, in order
    pub fn executed_queries(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Every execution attempt, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self, query: &str) -> Option<Error> {
        let mut failures = self.failures.lock();
        let failure = failures.get_mut(query)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        let message = "injected failure";
        Some(if failure.retryable {
            Error::transient(query, message)
        } else {
            Error::fatal_query(query, message)
        })
    }
}

#[async_trait]
impl ClusterSession for InMemoryCluster {
    async fn execute(&self, query: &str, _consistency: Consistency) -> Result<ResultSet> {
        let query = query.trim();
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.take_failure(query) {
            return Err(err);
        }

        let canned = self
            .results
            .get(query)
            .or(self.default_result.as_ref())
            .ok_or_else(|| Error::fatal_query(query, "unconfigured table"))?
            .clone();
        self.executed.lock().push(query.to_string());

        match self.stream_faults.lock().remove(query) {
            Some(after_rows) => {
                let mut items: Vec<Result<Row>> = canned
                    .rows
                    .into_iter()
                    .take(after_rows)
                    .map(Ok)
                    .collect();
                items.push(Err(Error::transient(query, "connection reset mid-stream")));
                Ok(ResultSet::new(
                    canned.columns,
                    Box::pin(futures::stream::iter(items)),
                ))
            }
            None => Ok(ResultSet::from_rows(canned.columns, canned.rows)),
        }
    }

    async fn partition_key_columns(&self, keyspace: &str, table: &str) -> Result<Vec<String>> {
        self.tables
            .get(&(keyspace.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| Error::TableNotFound {
                keyspace: keyspace.to_string(),
                table: table.to_string(),
            })
    }

    async fn token_ranges(&self) -> Result<Vec<TokenRange>> {
        if self.ring.tokens().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.ring.ranges())
    }

    fn active_keyspace(&self) -> Option<String> {
        self.keyspace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use futures::TryStreamExt;

    fn schema() -> ColumnSchema {
        ColumnSchema::parse(&[("id", "int")]).unwrap()
    }

    #[tokio::test]
    async fn test_canned_result_is_served() {
        let cluster = InMemoryCluster::new().with_result(
            "select id from t",
            schema(),
            vec![Row::new(vec![Value::Int(1)])],
        );
        let result = cluster
            .execute(" select id from t ", Consistency::One)
            .await
            .unwrap();
        let rows: Vec<Row> = result.rows.try_collect().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(cluster.executed_queries(), vec!["select id from t"]);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let cluster = InMemoryCluster::new().with_default_result(schema(), vec![]);
        cluster.fail_next("q", 2, true);
        assert!(cluster.execute("q", Consistency::One).await.is_err());
        assert!(cluster.execute("q", Consistency::One).await.is_err());
        assert!(cluster.execute("q", Consistency::One).await.is_ok());
        assert_eq!(cluster.attempts(), 3);
    }

    #[tokio::test]
    async fn test_missing_table_is_reported() {
        let cluster = InMemoryCluster::new().with_table("ks", "users", &["id"]);
        assert_eq!(
            cluster.partition_key_columns("ks", "users").await.unwrap(),
            vec!["id".to_string()]
        );
        let err = cluster
            .partition_key_columns("ks", "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));
    }
}
