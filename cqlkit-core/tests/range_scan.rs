//! Planned token-range scans executed through the engine

use std::sync::Arc;

use cqlkit_core::cluster::memory::InMemoryCluster;
use cqlkit_core::sink::SharedBuffer;
use cqlkit_core::{
    ColumnSchema, EncoderConfig, ExecutionConfig, ExecutionEngine, OutputFormat, OutputSink,
    Progress, RangePlanner, RangeQuery, RecordEncoder, RetryPolicy, Row, TableRef, Value,
};

fn cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_keyspace("shop")
        .with_table("shop", "orders", &["customer", "day"])
        .with_tokens(vec![-4_000_000_000, 12, 9_000_000_000_000])
}

#[tokio::test]
async fn test_range_scan_runs_one_query_per_sub_range() {
    let schema = ColumnSchema::parse(&[("customer", "text"), ("day", "date")]).unwrap();
    let cluster = cluster().with_default_result(
        schema,
        vec![Row::new(vec![Value::from("c1"), Value::Null])],
    );

    let queries = RangePlanner::new(&cluster)
        .plan(&RangeQuery::PartitionKeys(TableRef::new(None, "orders")))
        .await
        .unwrap();
    // three node ranges, one of them wrapping
    assert_eq!(queries.len(), 4);
    assert!(queries
        .iter()
        .all(|q| q.starts_with("SELECT DISTINCT customer, day FROM shop.orders WHERE token(customer, day) > ")));

    let cluster = Arc::new(cluster);
    let out = SharedBuffer::new();
    let progress = SharedBuffer::new();
    let config = ExecutionConfig {
        parallelism: 2,
        retry: RetryPolicy::immediate(0),
        ..ExecutionConfig::default()
    };
    let engine = ExecutionEngine::with_progress(
        cluster.clone(),
        RecordEncoder::for_format(&OutputFormat::Csv, &EncoderConfig::default()).unwrap(),
        OutputSink::lines(out.clone()),
        config,
        Progress::new(true, progress.clone()),
    );

    let summary = engine.run(queries.clone()).await.unwrap();
    assert_eq!(summary.queries, 4);
    assert_eq!(out.contents().lines().filter(|l| *l == "c1,").count(), 4);
    assert_eq!(out.contents().lines().next(), Some("customer,day"));

    let mut executed = cluster.executed_queries();
    executed.sort();
    let mut expected = queries;
    expected.sort();
    assert_eq!(executed, expected);
    assert!(progress.contents().lines().any(|l| l == "Progress: 4/4"));
}

#[tokio::test]
async fn test_scan_with_where_clause_never_executes() {
    let cluster = cluster();
    let err = RangePlanner::new(&cluster)
        .plan(&RangeQuery::Scan(
            "select * from shop.orders where customer = 'x'".to_string(),
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("WHERE is not allowed"));
    assert_eq!(cluster.attempts(), 0);
}
