//! cqlkit core
//!
//! Token-range parallel query execution and row encoding for exporting
//! Cassandra-compatible tables as CSV, JSON or CQL statements.
//!
//! The pieces, leaves first:
//!
//! - [`encoding::ValueEncoder`] renders one typed cell.
//! - [`encoding::RowMapper`] implementations turn rows into records.
//! - [`planner::RangePlanner`] splits a table scan along the token ring.
//! - [`engine::ExecutionEngine`] runs queries, retries, and writes records.
//! - [`cluster::ClusterSession`] is the boundary to the cluster driver.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cqlkit_core::cluster::memory::InMemoryCluster;
//! use cqlkit_core::{
//!     ColumnSchema, EncoderConfig, ExecutionConfig, ExecutionEngine, OutputFormat, OutputSink,
//!     RecordEncoder, Row, Value,
//! };
//!
//! # tokio_test::block_on(async {
//! let schema = ColumnSchema::parse(&[("id", "int")])?;
//! let cluster = InMemoryCluster::new()
//!     .with_result("select id from t", schema, vec![Row::new(vec![Value::Int(1)])]);
//! let encoder = RecordEncoder::for_format(&OutputFormat::Csv, &EncoderConfig::default())?;
//! let engine = ExecutionEngine::new(
//!     Arc::new(cluster),
//!     encoder,
//!     OutputSink::lines(std::io::stdout()),
//!     ExecutionConfig::default(),
//! );
//! engine.run(vec!["select id from t".to_string()]).await?;
//! # Ok::<(), cqlkit_core::Error>(())
//! # });
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod planner;
pub mod sink;
pub mod types;

// Re-export main types for convenience
pub use crate::{
    cluster::{ClusterSession, ResultSet, TokenRange, TokenRing},
    config::{
        Consistency, DateFormat, EncoderConfig, ExecutionConfig, RetryPolicy, TimeZoneSetting,
    },
    encoding::{OutputFormat, RecordEncoder, RowMapper},
    engine::{ExecutionEngine, RunSummary},
    error::{Error, Result},
    planner::{RangePlanner, RangeQuery, TableRef},
    sink::{Layout, OutputSink, Progress},
    types::*,
};
