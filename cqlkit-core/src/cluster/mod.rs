//! Cluster session abstraction and token ring model
//!
//! The execution engine and the range planner only talk to a cluster through
//! [`ClusterSession`]. The CLI provides a driver-backed implementation and
//! [`memory::InMemoryCluster`] provides a deterministic one.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Consistency;
use crate::error::Result;
use crate::types::{ColumnSchema, Row};

/// Smallest Murmur3 token; no partition key ever hashes to it
pub const MIN_TOKEN: i64 = i64::MIN;

/// Largest Murmur3 token
pub const MAX_TOKEN: i64 = i64::MAX;

/// Row sequence of one executed statement
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Column metadata plus the rows of one executed statement
pub struct ResultSet {
    pub columns: ColumnSchema,
    pub rows: RowStream,
}

impl ResultSet {
    pub fn new(columns: ColumnSchema, rows: RowStream) -> Self {
        Self { columns, rows }
    }

    /// Result set over rows already in memory
    pub fn from_rows(columns: ColumnSchema, rows: Vec<Row>) -> Self {
        let rows = futures::stream::iter(rows.into_iter().map(Ok));
        Self {
            columns,
            rows: Box::pin(rows),
        }
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Authenticated handle to a cluster, shared by every worker
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Execute one statement and return its column schema and rows
    async fn execute(&self, query: &str, consistency: Consistency) -> Result<ResultSet>;

    /// Ordered partition key column names of `keyspace.table`
    ///
    /// Fails with [`crate::Error::TableNotFound`] when the table does not exist.
    async fn partition_key_columns(&self, keyspace: &str, table: &str) -> Result<Vec<String>>;

    /// Token ranges owned by the cluster's nodes
    async fn token_ranges(&self) -> Result<Vec<TokenRange>>;

    /// Keyspace selected for the session, if any
    fn active_keyspace(&self) -> Option<String>;

    /// Release the connections held by the session
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Half-open token interval `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRange {
    pub start: i64,
    pub end: i64,
}

impl TokenRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The range covering every token
    pub fn full_ring() -> Self {
        Self::new(MIN_TOKEN, MIN_TOKEN)
    }

    /// A range whose start equals its end spans the whole ring
    pub fn is_full_ring(&self) -> bool {
        self.start == self.end
    }

    /// Crosses the ring origin and needs two predicates to express
    pub fn is_wrapped_around(&self) -> bool {
        self.start > self.end && self.start != MAX_TOKEN && self.end != MIN_TOKEN
    }

    /// Split into non-wrapping sub-ranges whose union equals this range
    ///
    /// Every returned range satisfies `start < end`, so it can be expressed as
    /// `token > start AND token <= end`.
    pub fn unwrap(&self) -> Vec<TokenRange> {
        if self.start < self.end {
            return vec![*self];
        }
        // start >= end: the range runs from start to the top of the ring and
        // continues from the bottom up to end.
        [
            TokenRange::new(self.start, MAX_TOKEN),
            TokenRange::new(MIN_TOKEN, self.end),
        ]
        .into_iter()
        .filter(|part| part.start < part.end)
        .collect()
    }

    pub fn contains(&self, token: i64) -> bool {
        if self.start < self.end {
            token > self.start && token <= self.end
        } else {
            self.unwrap().iter().any(|part| part.contains(token))
        }
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

/// Ring of node tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRing {
    tokens: Vec<i64>,
}

impl TokenRing {
    pub fn new(mut tokens: Vec<i64>) -> Self {
        tokens.sort_unstable();
        tokens.dedup();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[i64] {
        &self.tokens
    }

    /// One range per token, ending at that token and starting at its predecessor
    ///
    /// The first range wraps from the last token around to the first one; an
    /// empty ring yields the full ring.
    pub fn ranges(&self) -> Vec<TokenRange> {
        if self.tokens.is_empty() {
            return vec![TokenRange::full_ring()];
        }
        let last = self.tokens[self.tokens.len() - 1];
        let mut ranges = Vec::with_capacity(self.tokens.len());
        let mut previous = last;
        for &token in &self.tokens {
            ranges.push(TokenRange::new(previous, token));
            previous = token;
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_partitions_ring(mut parts: Vec<TokenRange>) {
        parts.sort_by_key(|r| r.start);
        assert_eq!(parts.first().map(|r| r.start), Some(MIN_TOKEN));
        assert_eq!(parts.last().map(|r| r.end), Some(MAX_TOKEN));
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {}", pair[0]);
        }
        for part in &parts {
            assert!(part.start < part.end);
        }
    }

    #[test]
    fn test_normal_range_is_not_split() {
        let range = TokenRange::new(-10, 10);
        assert!(!range.is_wrapped_around());
        assert_eq!(range.unwrap(), vec![range]);
    }

    #[test]
    fn test_wrapped_range_splits_in_two() {
        let range = TokenRange::new(100, -100);
        assert!(range.is_wrapped_around());
        assert_eq!(
            range.unwrap(),
            vec![
                TokenRange::new(100, MAX_TOKEN),
                TokenRange::new(MIN_TOKEN, -100)
            ]
        );
    }

    #[test]
    fn test_range_ending_at_min_token_runs_to_top_of_ring() {
        let range = TokenRange::new(42, MIN_TOKEN);
        assert!(!range.is_wrapped_around());
        assert_eq!(range.unwrap(), vec![TokenRange::new(42, MAX_TOKEN)]);
    }

    #[test]
    fn test_full_ring_unwraps_to_whole_space() {
        assert_eq!(
            TokenRange::full_ring().unwrap(),
            vec![TokenRange::new(MIN_TOKEN, MAX_TOKEN)]
        );
        let single = TokenRange::new(7, 7);
        assert!(single.is_full_ring());
        assert_partitions_ring(single.unwrap());
    }

    #[test]
    fn test_empty_ring_yields_full_range() {
        let ring = TokenRing::new(vec![]);
        assert_eq!(ring.ranges(), vec![TokenRange::full_ring()]);
    }

    #[test]
    fn test_ring_ranges_cover_space() {
        let ring = TokenRing::new(vec![300, -5_000, 0, 300, 9_000]);
        assert_eq!(ring.tokens(), &[-5_000, 0, 300, 9_000]);
        let ranges = ring.ranges();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], TokenRange::new(9_000, -5_000));
        assert_partitions_ring(ranges.iter().flat_map(|r| r.unwrap()).collect());
    }

    proptest! {
        #[test]
        fn prop_ring_unwrap_partitions_token_space(
            tokens in proptest::collection::vec(any::<i64>(), 0..64)
        ) {
            let ring = TokenRing::new(tokens);
            let parts: Vec<TokenRange> = ring.ranges().iter().flat_map(|r| r.unwrap()).collect();
            assert_partitions_ring(parts);
        }

        #[test]
        fn prop_every_token_has_exactly_one_owner(
            tokens in proptest::collection::vec(any::<i64>(), 1..32),
            probe in (MIN_TOKEN + 1)..=MAX_TOKEN,
        ) {
            let ring = TokenRing::new(tokens);
            let parts: Vec<TokenRange> = ring.ranges().iter().flat_map(|r| r.unwrap()).collect();
            let owners = parts.iter().filter(|r| r.contains(probe)).count();
            prop_assert_eq!(owners, 1);
        }

        #[test]
        fn prop_wrapped_range_unwraps_into_two_equal_halves(
            start in (MIN_TOKEN + 1)..(MAX_TOKEN - 1),
            end in (MIN_TOKEN + 1)..(MAX_TOKEN - 1),
            probe in (MIN_TOKEN + 1)..=MAX_TOKEN,
        ) {
            prop_assume!(start > end);
            let range = TokenRange::new(start, end);
            prop_assert!(range.is_wrapped_around());
            let parts = range.unwrap();
            prop_assert_eq!(parts.len(), 2);
            prop_assert!(parts.iter().all(|p| p.start < p.end));
            let in_original = probe > start || probe <= end;
            let in_parts = parts.iter().filter(|p| p.contains(probe)).count();
            prop_assert_eq!(in_parts, usize::from(in_original));
        }
    }
}
