//! Time-series storage
//!
//! The store keeps append-only raw points plus pre-computed buckets for every
//! interval type. Raw scans are bounded: a query over too wide a raw range is
//! rejected rather than truncated, and callers are expected to ask for an
//! aggregated interval instead.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::metrics::{
    constants::retention, AggregateBucket, Aggregation, IntervalType, MetricName, RetentionDays,
    SeriesPoint, Tags, TimeRange, TimeRangeError, TimeSeriesPoint,
};

pub use memory::InMemoryStore;

/// Which raw-scan limit a query exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeLimit {
    Span { requested_secs: i64, max_secs: u64 },
    Points { max_points: usize },
}

impl fmt::Display for RangeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Span {
                requested_secs,
                max_secs,
            } => write!(
                f,
                "span of {requested_secs}s exceeds raw limit of {max_secs}s"
            ),
            Self::Points { max_points } => {
                write!(f, "more than {max_points} raw points in range")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Raw range too large ({detail}); request an aggregated interval")]
    RangeTooLarge { detail: RangeLimit },

    #[error("Invalid range: {0}")]
    InvalidRange(#[from] TimeRangeError),

    #[error("Point for metric '{found}' written to series '{expected}'")]
    MetricMismatch {
        expected: MetricName,
        found: MetricName,
    },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Only transient unavailability is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// A range read against one metric
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub metric: MetricName,
    pub range: TimeRange,
    /// `None` reads raw points
    pub interval: Option<IntervalType>,
    pub aggregation: Aggregation,
    pub tags: Tags,
}

impl SeriesQuery {
    pub fn new(metric: MetricName, range: TimeRange) -> Self {
        Self {
            metric,
            range,
            interval: None,
            aggregation: Aggregation::default(),
            tags: Tags::default(),
        }
    }

    pub fn with_interval(mut self, interval: IntervalType) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Outcome of a durable write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub points_written: usize,
    pub buckets_touched: usize,
}

/// Outcome of a retention pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub raw_cutoff: DateTime<Utc>,
    pub bucket_cutoff: DateTime<Utc>,
    pub raw_points_removed: usize,
    pub buckets_removed: usize,
}

/// Limits and retention settings for a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Widest range a raw query may span
    pub max_raw_range: Duration,
    /// Most raw points a single query may return
    pub max_raw_points: usize,
    /// Buckets are kept this many times longer than raw points
    pub bucket_retention_multiplier: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_raw_range: Duration::from_secs(24 * 60 * 60),
            max_raw_points: 100_000,
            bucket_retention_multiplier: retention::DEFAULT_BUCKET_RETENTION_MULTIPLIER,
        }
    }
}

/// Storage seam between the processor/query engine and a backend
///
/// Bucket upserts must be atomic per bucket key: concurrent writers touching
/// the same bucket never lose an update.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Append raw points for `metric` and upsert every covering bucket
    async fn write_points(
        &self,
        metric: &MetricName,
        points: &[TimeSeriesPoint],
    ) -> Result<WriteReceipt, StoreError>;

    /// Time-ordered points for the query's range
    async fn query(&self, query: &SeriesQuery) -> Result<Vec<SeriesPoint>, StoreError>;

    /// Unmerged buckets whose start lies in `range` and whose tags match `tags`
    async fn buckets(
        &self,
        metric: &MetricName,
        interval: IntervalType,
        range: &TimeRange,
        tags: &Tags,
    ) -> Result<Vec<AggregateBucket>, StoreError>;

    /// Remove raw points older than `retention` and buckets older than the
    /// configured multiple of it
    async fn cleanup_old_data(&self, retention: RetentionDays)
        -> Result<CleanupReport, StoreError>;
}
