//! In-memory time-series store
//!
//! Raw points live in one ordered map per metric; buckets live in one ordered
//! map per `(metric, interval, tags)` series. Both are held in `DashMap`s, so
//! every upsert runs under the shard lock of the series it touches and two
//! writers can never lose an update to the same bucket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::metrics::{
    AggregateBucket, BucketBatch, BucketKey, BucketUpdate, IntervalType, MetricName,
    RetentionDays, SeriesPoint, Tags, TimeRange, TimeSeriesPoint,
};
use crate::infrastructure::log_messages;
use crate::store::{
    CleanupReport, RangeLimit, SeriesQuery, StoreConfig, StoreError, TimeSeriesStore,
    WriteReceipt,
};

#[derive(Debug, Clone)]
struct RawSample {
    timestamp: DateTime<Utc>,
    value: f64,
    tags: Tags,
}

/// Raw samples of one metric keyed by epoch milliseconds
type RawSeries = BTreeMap<i64, Vec<RawSample>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    metric: MetricName,
    interval: IntervalType,
    tags_hash: String,
}

#[derive(Debug)]
struct BucketSeries {
    tags: Tags,
    /// Buckets keyed by start in epoch seconds
    buckets: BTreeMap<i64, AggregateBucket>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    config: StoreConfig,
    raw: DashMap<MetricName, RawSeries>,
    buckets: DashMap<SeriesKey, BucketSeries>,
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            raw: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn upsert_bucket(&self, key: BucketKey, tags: Tags, update: &BucketUpdate) {
        let series_key = SeriesKey {
            metric: key.metric.clone(),
            interval: key.interval,
            tags_hash: key.tags_hash,
        };
        let mut series = self
            .buckets
            .entry(series_key)
            .or_insert_with(|| BucketSeries {
                tags: tags.clone(),
                buckets: BTreeMap::new(),
            });

        match series.buckets.entry(key.bucket_start) {
            Entry::Occupied(mut bucket) => bucket.get_mut().apply(update),
            Entry::Vacant(slot) => {
                let start = DateTime::from_timestamp(key.bucket_start, 0).unwrap_or_default();
                slot.insert(AggregateBucket::from_update(
                    key.metric,
                    key.interval,
                    start,
                    tags,
                    update,
                ));
            }
        }
    }

    fn query_raw(&self, query: &SeriesQuery) -> Result<Vec<SeriesPoint>, StoreError> {
        let max_ms = i64::try_from(self.config.max_raw_range.as_millis()).unwrap_or(i64::MAX);
        let span = query.range.span();
        if span.num_milliseconds() > max_ms {
            return Err(StoreError::RangeTooLarge {
                detail: RangeLimit::Span {
                    requested_secs: span.num_seconds(),
                    max_secs: self.config.max_raw_range.as_secs(),
                },
            });
        }

        let Some(series) = self.raw.get(&query.metric) else {
            return Ok(Vec::new());
        };

        let start = query.range.start().timestamp_millis();
        let end = query.range.end().timestamp_millis();
        let mut points = Vec::new();
        for sample in series.range(start..=end).flat_map(|(_, samples)| samples) {
            if !query.range.contains(sample.timestamp) || !sample.tags.matches(&query.tags) {
                continue;
            }
            if points.len() == self.config.max_raw_points {
                return Err(StoreError::RangeTooLarge {
                    detail: RangeLimit::Points {
                        max_points: self.config.max_raw_points,
                    },
                });
            }
            points.push(SeriesPoint::new(sample.timestamp, sample.value));
        }
        Ok(points)
    }

    fn collect_buckets(
        &self,
        metric: &MetricName,
        interval: IntervalType,
        range: &TimeRange,
        tags: &Tags,
    ) -> Vec<AggregateBucket> {
        let mut found = Vec::new();
        for entry in self.buckets.iter() {
            let (key, series) = entry.pair();
            if key.metric != *metric || key.interval != interval || !series.tags.matches(tags) {
                continue;
            }
            found.extend(
                series
                    .buckets
                    .range(range.start().timestamp()..)
                    .map(|(_, bucket)| bucket)
                    .take_while(|bucket| bucket.bucket_start() < range.end())
                    .filter(|bucket| range.contains(bucket.bucket_start()))
                    .cloned(),
            );
        }
        found.sort_by_cached_key(|bucket| (bucket.bucket_start(), bucket.tags().fingerprint()));
        found
    }

    /// Remove data older than the retention cutoffs relative to `now`
    ///
    /// Only data strictly older than the cutoff is removed, so this is safe
    /// to run while writers are active. Locks are released between series.
    pub async fn cleanup_older_than(
        &self,
        now: DateTime<Utc>,
        retention: RetentionDays,
    ) -> CleanupReport {
        let raw_cutoff = retention.raw_cutoff(now);
        let bucket_cutoff = retention.bucket_cutoff(now, self.config.bucket_retention_multiplier);

        let cutoff_ms = raw_cutoff.timestamp_millis();
        let mut raw_points_removed = 0;
        let metrics: Vec<MetricName> = self.raw.iter().map(|entry| entry.key().clone()).collect();
        for metric in metrics {
            if let Some(mut series) = self.raw.get_mut(&metric) {
                let kept = series.split_off(&cutoff_ms);
                let expired = std::mem::replace(&mut *series, kept);
                raw_points_removed += expired.values().map(Vec::len).sum::<usize>();
            }
            self.raw.remove_if(&metric, |_, series| series.is_empty());
            tokio::task::yield_now().await;
        }

        let cutoff_secs = bucket_cutoff.timestamp();
        let mut buckets_removed = 0;
        let keys: Vec<SeriesKey> = self.buckets.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            // a bucket is expired once its end is at or before the cutoff
            let first_kept = cutoff_secs - key.interval.seconds() + 1;
            if let Some(mut series) = self.buckets.get_mut(&key) {
                let kept = series.buckets.split_off(&first_kept);
                let expired = std::mem::replace(&mut series.buckets, kept);
                buckets_removed += expired.len();
            }
            self.buckets.remove_if(&key, |_, series| series.buckets.is_empty());
            tokio::task::yield_now().await;
        }

        info!(
            raw_points_removed,
            buckets_removed,
            %raw_cutoff,
            %bucket_cutoff,
            "{}",
            log_messages::store::CLEANUP_COMPLETED
        );

        CleanupReport {
            raw_cutoff,
            bucket_cutoff,
            raw_points_removed,
            buckets_removed,
        }
    }

    /// Number of raw points currently held
    pub fn raw_point_count(&self) -> usize {
        self.raw
            .iter()
            .map(|series| series.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Number of buckets currently held across all interval types
    pub fn bucket_count(&self) -> usize {
        self.buckets.iter().map(|series| series.buckets.len()).sum()
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryStore {
    async fn write_points(
        &self,
        metric: &MetricName,
        points: &[TimeSeriesPoint],
    ) -> Result<WriteReceipt, StoreError> {
        if let Some(point) = points.iter().find(|point| point.metric != *metric) {
            return Err(StoreError::MetricMismatch {
                expected: metric.clone(),
                found: point.metric.clone(),
            });
        }
        if points.is_empty() {
            return Ok(WriteReceipt::default());
        }

        {
            let mut series = self.raw.entry(metric.clone()).or_default();
            for point in points {
                series
                    .entry(point.timestamp.timestamp_millis())
                    .or_default()
                    .push(RawSample {
                        timestamp: point.timestamp,
                        value: point.value,
                        tags: point.tags.clone(),
                    });
            }
        }

        let batch = BucketBatch::from_points(points);
        let buckets_touched = batch.len();
        for (key, tags, update) in batch.into_updates() {
            self.upsert_bucket(key, tags, &update);
        }

        debug!(
            metric = %metric,
            points = points.len(),
            buckets_touched,
            "Points written"
        );

        Ok(WriteReceipt {
            points_written: points.len(),
            buckets_touched,
        })
    }

    async fn query(&self, query: &SeriesQuery) -> Result<Vec<SeriesPoint>, StoreError> {
        let Some(interval) = query.interval else {
            return self.query_raw(query);
        };

        let mut merged: BTreeMap<DateTime<Utc>, AggregateBucket> = BTreeMap::new();
        for bucket in self.collect_buckets(&query.metric, interval, &query.range, &query.tags) {
            match merged.entry(bucket.bucket_start()) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(&bucket),
                Entry::Vacant(slot) => {
                    slot.insert(bucket);
                }
            }
        }

        Ok(merged
            .into_iter()
            .map(|(start, bucket)| SeriesPoint::new(start, bucket.value(query.aggregation)))
            .collect())
    }

    async fn buckets(
        &self,
        metric: &MetricName,
        interval: IntervalType,
        range: &TimeRange,
        tags: &Tags,
    ) -> Result<Vec<AggregateBucket>, StoreError> {
        Ok(self.collect_buckets(metric, interval, range, tags))
    }

    async fn cleanup_old_data(
        &self,
        retention: RetentionDays,
    ) -> Result<CleanupReport, StoreError> {
        Ok(self.cleanup_older_than(Utc::now(), retention).await)
    }
}
