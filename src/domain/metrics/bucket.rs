//! Pre-computed aggregate buckets
//!
//! A bucket holds `sum`, `count`, `min` and `max` for one
//! `(metric, interval, bucket_start, tags)` combination. `avg` is always
//! derived from `sum / count` after every change, never stored independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::metrics::{
    interval::IntervalType,
    point::{MetricName, Tags, TimeSeriesPoint},
};

/// Identity of a bucket: metric, interval, bucket start (epoch seconds) and tag fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub metric: MetricName,
    pub interval: IntervalType,
    pub bucket_start: i64,
    pub tags_hash: String,
}

impl BucketKey {
    pub fn for_point(point: &TimeSeriesPoint, interval: IntervalType) -> Self {
        Self {
            metric: point.metric.clone(),
            interval,
            bucket_start: interval.bucket_start_secs(point.timestamp),
            tags_hash: point.tags.fingerprint(),
        }
    }
}

/// Partial aggregate of a group of values, applied to a bucket in one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketUpdate {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl BucketUpdate {
    pub fn from_value(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    pub fn absorb(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Value projected from a bucket by a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        };
        f.write_str(name)
    }
}

/// Aggregated statistics for one fixed-width window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBucket {
    metric: MetricName,
    interval_type: IntervalType,
    bucket_start: DateTime<Utc>,
    sum: f64,
    avg: f64,
    min: f64,
    max: f64,
    count: u64,
    tags: Tags,
}

impl AggregateBucket {
    /// Create a bucket from its first update
    pub fn from_update(
        metric: MetricName,
        interval_type: IntervalType,
        bucket_start: DateTime<Utc>,
        tags: Tags,
        update: &BucketUpdate,
    ) -> Self {
        let mut bucket = Self {
            metric,
            interval_type,
            bucket_start,
            sum: 0.0,
            avg: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
            tags,
        };
        bucket.apply(update);
        bucket
    }

    /// Upsert: `sum += u.sum; count += u.count; min/max` widened, `avg` recomputed
    pub fn apply(&mut self, update: &BucketUpdate) {
        self.sum += update.sum;
        self.count += update.count;
        self.min = self.min.min(update.min);
        self.max = self.max.max(update.max);
        self.recompute_avg();
    }

    /// Fold another bucket covering the same window into this one
    pub fn merge(&mut self, other: &AggregateBucket) {
        self.apply(&BucketUpdate {
            sum: other.sum,
            count: other.count,
            min: other.min,
            max: other.max,
        });
    }

    fn recompute_avg(&mut self) {
        self.avg = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        };
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            metric: self.metric.clone(),
            interval: self.interval_type,
            bucket_start: self.bucket_start.timestamp(),
            tags_hash: self.tags.fingerprint(),
        }
    }

    pub fn value(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Avg => self.avg,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Count => self.count as f64,
        }
    }

    pub fn metric(&self) -> &MetricName {
        &self.metric
    }

    pub fn interval_type(&self) -> IntervalType {
        self.interval_type
    }

    pub fn bucket_start(&self) -> DateTime<Utc> {
        self.bucket_start
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + self.interval_type.duration()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

/// Bucket updates for a set of points, grouped by bucket key
///
/// Every point contributes to all interval types in the same pass, so coarser
/// buckets always account for exactly the points the finer ones do.
#[derive(Debug, Default)]
pub struct BucketBatch {
    updates: HashMap<BucketKey, (Tags, BucketUpdate)>,
}

impl BucketBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a TimeSeriesPoint>) -> Self {
        let mut batch = Self::new();
        for point in points {
            batch.add_point(point);
        }
        batch
    }

    pub fn add_point(&mut self, point: &TimeSeriesPoint) {
        for interval in IntervalType::ALL {
            let key = BucketKey::for_point(point, interval);
            self.updates
                .entry(key)
                .and_modify(|(_, update)| update.absorb(point.value))
                .or_insert_with(|| (point.tags.clone(), BucketUpdate::from_value(point.value)));
        }
    }

    /// Number of distinct buckets touched
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn into_updates(self) -> impl Iterator<Item = (BucketKey, Tags, BucketUpdate)> {
        self.updates
            .into_iter()
            .map(|(key, (tags, update))| (key, tags, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(secs: u32, value: f64) -> TimeSeriesPoint {
        TimeSeriesPoint::new(
            MetricName::try_new("tokens").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            value,
        )
    }

    #[test]
    fn avg_is_recomputed_on_every_apply() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut bucket = AggregateBucket::from_update(
            MetricName::try_new("tokens").unwrap(),
            IntervalType::OneMinute,
            start,
            Tags::new(),
            &BucketUpdate::from_value(10.0),
        );
        bucket.apply(&BucketUpdate::from_value(20.0));
        bucket.apply(&BucketUpdate::from_value(30.0));

        assert_eq!(bucket.sum(), 60.0);
        assert_eq!(bucket.count(), 3);
        assert_eq!(bucket.avg(), 20.0);
        assert_eq!(bucket.min(), 10.0);
        assert_eq!(bucket.max(), 30.0);
        assert_eq!(bucket.bucket_end(), start + chrono::Duration::minutes(1));
    }

    #[test]
    fn batch_groups_points_sharing_a_bucket() {
        let points = [point(5, 10.0), point(15, 20.0), point(40, 30.0)];
        let batch = BucketBatch::from_points(points.iter());

        // one bucket per interval type
        assert_eq!(batch.len(), IntervalType::ALL.len());
        for (key, _, update) in batch.into_updates() {
            assert_eq!(key.bucket_start, 1_704_067_200);
            assert_eq!(update.count, 3);
            assert_eq!(update.sum, 60.0);
            assert_eq!(update.min, 10.0);
            assert_eq!(update.max, 30.0);
        }
    }

    #[test]
    fn different_tags_land_in_different_buckets() {
        let a = point(5, 1.0).with_tags(Tags::new().with("model", "a"));
        let b = point(5, 1.0).with_tags(Tags::new().with("model", "b"));
        let batch = BucketBatch::from_points([&a, &b]);
        assert_eq!(batch.len(), 2 * IntervalType::ALL.len());
    }

    #[test]
    fn merge_combines_statistics() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let metric = MetricName::try_new("tokens").unwrap();
        let mut a = AggregateBucket::from_update(
            metric.clone(),
            IntervalType::OneHour,
            start,
            Tags::new().with("model", "a"),
            &BucketUpdate::from_value(4.0),
        );
        let b = AggregateBucket::from_update(
            metric,
            IntervalType::OneHour,
            start,
            Tags::new().with("model", "b"),
            &BucketUpdate::from_value(8.0),
        );
        a.merge(&b);
        assert_eq!(a.value(Aggregation::Sum), 12.0);
        assert_eq!(a.value(Aggregation::Avg), 6.0);
        assert_eq!(a.value(Aggregation::Count), 2.0);
        assert_eq!(a.value(Aggregation::Min), 4.0);
        assert_eq!(a.value(Aggregation::Max), 8.0);
    }
}
