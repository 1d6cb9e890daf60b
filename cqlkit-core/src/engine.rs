//! Query execution engine
//!
//! Runs a sequence of queries against a shared [`ClusterSession`], either one
//! after another or across a bounded pool of concurrent tasks, and streams
//! every row through the [`RecordEncoder`] into the [`OutputSink`].
//!
//! A failed query is re-executed after a fixed delay as long as the error is
//! recoverable and the retry budget is not exhausted. Rows an earlier attempt
//! already wrote are skipped on the next one, relying on the cluster
//! returning a query's rows in the same token and clustering order every
//! time. Anything else ends the run.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterSession;
use crate::config::ExecutionConfig;
use crate::encoding::RecordEncoder;
use crate::error::{Error, Result};
use crate::sink::{OutputSink, Progress};

/// Totals of a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Queries that completed
    pub queries: usize,
    /// Records written
    pub rows: u64,
    /// Re-executions across all queries
    pub retries: u32,
}

impl RunSummary {
    fn add(&mut self, stats: QueryStats) {
        self.queries += 1;
        self.rows += stats.rows;
        self.retries += stats.retries;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct QueryStats {
    rows: u64,
    retries: u32,
}

/// Failure of one attempt, with the rows it already wrote
struct AttemptFailure {
    error: Error,
    rows_written: u64,
}

impl AttemptFailure {
    fn before_output(error: Error) -> Self {
        Self {
            error,
            rows_written: 0,
        }
    }
}

/// State every task needs
struct Shared {
    session: Arc<dyn ClusterSession>,
    encoder: RecordEncoder,
    sink: OutputSink,
    progress: Progress,
    config: ExecutionConfig,
}

/// Executes queries and writes their rows
pub struct ExecutionEngine {
    shared: Arc<Shared>,
}

impl ExecutionEngine {
    /// Progress is reported on stderr when the configuration is parallel
    pub fn new(
        session: Arc<dyn ClusterSession>,
        encoder: RecordEncoder,
        sink: OutputSink,
        config: ExecutionConfig,
    ) -> Self {
        let progress = Progress::stderr(config.is_parallel());
        Self::with_progress(session, encoder, sink, config, progress)
    }

    pub fn with_progress(
        session: Arc<dyn ClusterSession>,
        encoder: RecordEncoder,
        sink: OutputSink,
        config: ExecutionConfig,
        progress: Progress,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                session,
                encoder,
                sink,
                progress,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.shared.config
    }

    pub fn progress(&self) -> &Progress {
        &self.shared.progress
    }

    /// Execute every non-blank query and write all rows
    ///
    /// Stops at the first terminal failure. Output already written stays
    /// written; the array layout is only closed on success.
    pub async fn run<I>(&self, queries: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = String>,
    {
        let queries = queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        self.shared.sink.begin()?;
        let outcome = if self.shared.config.is_parallel() {
            self.run_parallel(queries).await
        } else {
            self.run_sequential(queries).await
        };

        match outcome {
            Ok(summary) => {
                self.shared.sink.finish()?;
                info!(
                    queries = summary.queries,
                    rows = summary.rows,
                    retries = summary.retries,
                    "run complete"
                );
                Ok(summary)
            }
            Err(err) => {
                // keep the error that ended the run over a secondary flush failure
                let _ = self.shared.sink.flush();
                Err(err)
            }
        }
    }

    async fn run_sequential(&self, queries: impl Iterator<Item = String>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for query in queries {
            self.shared.progress.add_task();
            let stats = execute_with_retry(&self.shared, &query).await?;
            summary.add(stats);
        }
        Ok(summary)
    }

    async fn run_parallel(&self, queries: impl Iterator<Item = String>) -> Result<RunSummary> {
        let permits = Arc::new(Semaphore::new(self.shared.config.parallelism));
        let mut tasks = JoinSet::new();

        for query in queries {
            self.shared.progress.add_task();
            let shared = Arc::clone(&self.shared);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::internal("worker pool closed"))?;
                let outcome = execute_with_retry(&shared, &query).await;
                shared.progress.task_done();
                outcome
            });
        }
        debug!(
            tasks = tasks.len(),
            parallelism = self.shared.config.parallelism,
            "submitted queries"
        );

        let mut summary = RunSummary::default();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(stats)) => summary.add(stats),
                Ok(Err(err)) => {
                    if failure.is_none() {
                        tasks.abort_all();
                        failure = Some(err);
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if failure.is_none() {
                        tasks.abort_all();
                        failure = Some(Error::internal(format!("query task failed: {}", join_err)));
                    }
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.shared.config)
            .field("encoder", &self.shared.encoder)
            .field("sink", &self.shared.sink)
            .field("progress", &self.shared.progress)
            .finish()
    }
}

async fn execute_with_retry(shared: &Shared, query: &str) -> Result<QueryStats> {
    let policy = shared.config.retry;
    let mut retries = 0;
    let mut emitted = 0u64;

    loop {
        match execute_once(shared, query, emitted).await {
            Ok(rows) => {
                let rows = emitted + rows;
                debug!(query, rows, retries, "query complete");
                return Ok(QueryStats { rows, retries });
            }
            Err(failure) => {
                emitted += failure.rows_written;
                if !failure.error.is_recoverable() || retries >= policy.retries {
                    error!(
                        query,
                        attempts = retries + 1,
                        category = ?failure.error.category(),
                        error = %failure.error,
                        "query failed"
                    );
                    return Err(failure.error);
                }
                retries += 1;
                warn!(
                    query,
                    attempt = retries,
                    resume_after = emitted,
                    error = %failure.error,
                    "query failed, retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// One attempt; the first `skip` rows were written by earlier attempts
async fn execute_once(
    shared: &Shared,
    query: &str,
    skip: u64,
) -> std::result::Result<u64, AttemptFailure> {
    let result = shared
        .session
        .execute(query, shared.config.consistency)
        .await
        .map_err(AttemptFailure::before_output)?;

    let schema = shared
        .encoder
        .bind(&result.columns, &shared.sink)
        .map_err(AttemptFailure::before_output)?;

    let mut rows = result.rows;
    let mut seen = 0u64;
    let mut written = 0u64;
    while let Some(row) = rows.next().await {
        let fail = |error| AttemptFailure {
            error,
            rows_written: written,
        };
        let row = row.map_err(fail)?;
        seen += 1;
        if seen <= skip {
            continue;
        }
        let record = shared.encoder.encode(&schema, &row).map_err(fail)?;
        shared.sink.write_record(&record).map_err(fail)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::config::{EncoderConfig, RetryPolicy};
    use crate::encoding::OutputFormat;
    use crate::sink::SharedBuffer;
    use crate::types::{ColumnSchema, Row, Value};

    fn schema() -> ColumnSchema {
        ColumnSchema::parse(&[("id", "int")]).unwrap()
    }

    fn engine(
        cluster: Arc<InMemoryCluster>,
        parallelism: usize,
    ) -> (ExecutionEngine, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let config = ExecutionConfig {
            parallelism,
            retry: RetryPolicy::immediate(3),
            ..ExecutionConfig::default()
        };
        let encoder = RecordEncoder::for_format(&OutputFormat::Csv, &EncoderConfig::default())
            .unwrap();
        let engine = ExecutionEngine::with_progress(
            cluster,
            encoder,
            OutputSink::lines(out.clone()),
            config.clone(),
            Progress::new(config.is_parallel(), err.clone()),
        );
        (engine, out, err)
    }

    #[tokio::test]
    async fn test_sequential_run_keeps_query_order() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_result("q1", schema(), vec![Row::new(vec![Value::Int(1)])])
                .with_result("q2", schema(), vec![Row::new(vec![Value::Int(2)])]),
        );
        let (engine, out, err) = engine(cluster.clone(), 1);

        let summary = engine
            .run(vec!["q1".to_string(), "  ".to_string(), "q2".to_string()])
            .await
            .unwrap();

        assert_eq!(out.contents(), "id\n1\n2\n");
        assert_eq!(summary.queries, 2);
        assert_eq!(summary.rows, 2);
        assert_eq!(cluster.executed_queries(), vec!["q1", "q2"]);
        assert!(err.contents().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let cluster = Arc::new(
            InMemoryCluster::new().with_result("q", schema(), vec![Row::new(vec![Value::Int(1)])]),
        );
        cluster.fail_next("q", 2, true);
        let (engine, out, _) = engine(cluster.clone(), 1);

        let summary = engine.run(vec!["q".to_string()]).await.unwrap();
        assert_eq!(out.contents(), "id\n1\n");
        assert_eq!(summary.retries, 2);
        assert_eq!(cluster.attempts(), 3);
    }

    #[tokio::test]
    async fn test_fatal_failures_are_not_retried() {
        let cluster = Arc::new(InMemoryCluster::new().with_default_result(schema(), vec![]));
        cluster.fail_next("q", 1, false);
        let (engine, _, _) = engine(cluster.clone(), 1);

        assert!(engine.run(vec!["q".to_string()]).await.is_err());
        assert_eq!(cluster.attempts(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_resumes_without_duplicates() {
        let rows = (0..3).map(|i| Row::new(vec![Value::Int(i)])).collect();
        let cluster = Arc::new(InMemoryCluster::new().with_result("q", schema(), rows));
        cluster.fail_stream_once("q", 1);
        let (engine, out, _) = engine(cluster.clone(), 1);

        let summary = engine.run(vec!["q".to_string()]).await.unwrap();
        assert_eq!(out.contents(), "id\n0\n1\n2\n");
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.retries, 1);
        assert_eq!(cluster.attempts(), 2);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_with_no_budget_is_terminal() {
        let rows = (0..3).map(|i| Row::new(vec![Value::Int(i)])).collect();
        let cluster = Arc::new(InMemoryCluster::new().with_result("q", schema(), rows));
        cluster.fail_stream_once("q", 2);
        let out = SharedBuffer::new();
        let config = ExecutionConfig {
            retry: RetryPolicy::immediate(0),
            ..ExecutionConfig::default()
        };
        let engine = ExecutionEngine::with_progress(
            cluster.clone(),
            RecordEncoder::for_format(&OutputFormat::Csv, &EncoderConfig::default()).unwrap(),
            OutputSink::lines(out.clone()),
            config,
            Progress::new(false, SharedBuffer::new()),
        );

        let err = engine.run(vec!["q".to_string()]).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(out.contents(), "id\n0\n1\n");
        assert_eq!(cluster.attempts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_terminal_failure_aborts_run() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_default_result(schema(), vec![Row::new(vec![Value::Int(1)])]),
        );
        cluster.fail_next("q3", 4, true);
        let out = SharedBuffer::new();
        let err_out = SharedBuffer::new();
        let encoder_config = EncoderConfig {
            json_array: true,
            ..EncoderConfig::default()
        };
        let config = ExecutionConfig {
            parallelism: 4,
            retry: RetryPolicy::immediate(3),
            ..ExecutionConfig::default()
        };
        let engine = ExecutionEngine::with_progress(
            cluster.clone(),
            RecordEncoder::for_format(&OutputFormat::Json, &encoder_config).unwrap(),
            OutputSink::json_array(out.clone()),
            config,
            Progress::new(true, err_out.clone()),
        );

        let queries = (0..8).map(|i| format!("q{}", i)).collect::<Vec<_>>();
        let err = engine.run(queries).await.unwrap_err();

        match err {
            Error::Query {
                query, retryable, ..
            } => {
                assert_eq!(query, "q3");
                assert!(retryable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let failed_attempts = cluster
            .executed_queries()
            .iter()
            .filter(|q| q.as_str() == "q3")
            .count();
        assert_eq!(failed_attempts, 0);

        let progress = err_out.contents();
        let lines: Vec<&str> = progress.lines().collect();
        assert!(!lines.is_empty() && lines.len() <= 8);
        for line in &lines {
            let (done, total) = line
                .trim_start_matches("Progress: ")
                .split_once('/')
                .unwrap();
            assert_eq!(total, "8");
            assert!(done.parse::<usize>().unwrap() <= 8);
        }

        // the array stays open after a failed run
        let output = out.contents();
        assert!(output.starts_with('['));
        assert!(!output.trim_end().ends_with(']'));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_progress_counts_every_task() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_default_result(schema(), vec![Row::new(vec![Value::Int(1)])]),
        );
        let (engine, out, err) = engine(cluster, 3);

        let queries = (0..5).map(|i| format!("q{}", i)).collect::<Vec<_>>();
        let summary = engine.run(queries).await.unwrap();

        assert_eq!(summary.rows, 5);
        assert_eq!(out.contents().lines().count(), 6);
        let progress: Vec<String> = err.contents().lines().map(str::to_string).collect();
        assert_eq!(progress.len(), 5);
        assert!(progress.iter().all(|l| l.starts_with("Progress: ") && l.ends_with("/5")));
        assert_eq!(progress.last().map(String::as_str), Some("Progress: 5/5"));
    }
}
