//! Range reads over the store, cached, with optional statistical analysis

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::analysis::{analyze_series, analyze_trend, SeriesAnalysis, TrendAnalysis};
use crate::domain::metrics::{
    AggregateBucket, IntervalType, MetricName, SeriesPoint, Tags, TimeRange,
};
use crate::infrastructure::log_messages;
use crate::query::cache::{CacheStats, QueryCache, QueryCacheConfig};
use crate::query::request::{QueryRequest, Resolution};
use crate::query::QueryError;
use crate::store::{RangeLimit, StoreError, TimeSeriesStore};

/// A resolved series
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub points: Arc<Vec<SeriesPoint>>,
    /// `None` when the series is raw points
    pub interval: Option<IntervalType>,
    pub from_cache: bool,
}

impl QueryResult {
    /// Distance between adjacent positions of the series
    pub fn step(&self) -> Duration {
        self.interval
            .map_or_else(|| Duration::seconds(1), IntervalType::duration)
    }
}

pub struct QueryEngine {
    store: Arc<dyn TimeSeriesStore>,
    cache: QueryCache,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn TimeSeriesStore>, cache: &QueryCacheConfig) -> Self {
        Self {
            store,
            cache: QueryCache::new(cache),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resolve and read a series
    ///
    /// An `Auto` request that resolves to raw points but finds more than the
    /// store's raw point limit is answered from one-minute buckets instead.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult, QueryError> {
        self.query_at(request, Utc::now()).await
    }

    async fn query_at(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        match self.read(request, now).await {
            Err(QueryError::Store(StoreError::RangeTooLarge {
                detail: RangeLimit::Points { max_points },
            })) if request.resolution() == Resolution::Auto && request.interval().is_none() => {
                debug!(
                    metric = %request.metric(),
                    max_points,
                    "{}",
                    log_messages::query::AUTO_RAW_FALLBACK
                );
                let bucketed = request
                    .clone()
                    .with_resolution(Resolution::Interval(IntervalType::OneMinute));
                self.read(&bucketed, now).await
            }
            result => result,
        }
    }

    async fn read(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        let key = request.key();
        let interval = key.interval;
        let cacheable = !request.is_fresh() && !covers_open_bucket(request, now);

        if cacheable {
            if let Some(points) = self.cache.get(&key) {
                return Ok(QueryResult {
                    points,
                    interval,
                    from_cache: true,
                });
            }
            debug!(metric = %key.metric, "{}", log_messages::query::CACHE_MISS);
        }

        let points = Arc::new(self.store.query(&request.to_series_query()).await?);
        if cacheable {
            self.cache.insert(key, points.clone());
        }
        Ok(QueryResult {
            points,
            interval,
            from_cache: false,
        })
    }

    /// Aggregate buckets for dashboards, never cached
    pub async fn buckets(
        &self,
        metric: &MetricName,
        interval: IntervalType,
        range: &TimeRange,
        tags: &Tags,
    ) -> Result<Vec<AggregateBucket>, QueryError> {
        Ok(self.store.buckets(metric, interval, range, tags).await?)
    }

    /// Summary and trend analysis of the resolved series
    ///
    /// The trend slope is per bucket at the resolved interval and per second
    /// for raw points.
    pub async fn analyze(&self, request: &QueryRequest) -> Result<SeriesAnalysis, QueryError> {
        let result = self.query(request).await?;
        Ok(analyze_series(&result.points, result.step())?)
    }

    pub async fn trend(&self, request: &QueryRequest) -> Result<TrendAnalysis, QueryError> {
        let result = self.query(request).await?;
        Ok(analyze_trend(&result.points, result.step())?)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Whether the range reaches into the bucket that is still accumulating
///
/// Raw reads use the one-minute bucket as their open window.
fn covers_open_bucket(request: &QueryRequest, now: DateTime<Utc>) -> bool {
    let width = request.interval().unwrap_or(IntervalType::OneMinute);
    request.range().end() > width.bucket_start(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisError, TrendDirection};
    use crate::domain::metrics::{Aggregation, TimeSeriesPoint};
    use crate::store::{InMemoryStore, StoreConfig};

    fn tokens() -> MetricName {
        MetricName::try_new("tokens").unwrap()
    }

    async fn engine_with(points: &[(DateTime<Utc>, f64)]) -> (QueryEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        let points: Vec<_> = points
            .iter()
            .map(|(ts, v)| TimeSeriesPoint::new(tokens(), *ts, *v))
            .collect();
        store.write_points(&tokens(), &points).await.unwrap();
        (
            QueryEngine::new(store.clone(), &QueryCacheConfig::default()),
            store,
        )
    }

    fn closed_hour() -> DateTime<Utc> {
        IntervalType::OneHour.bucket_start(Utc::now()) - Duration::hours(3)
    }

    #[tokio::test]
    async fn closed_ranges_are_cached() {
        let start = closed_hour();
        let (engine, store) = engine_with(&[(start, 1.0)]).await;
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::hours(1)).unwrap(),
        )
        .with_resolution(Resolution::Interval(IntervalType::OneHour));

        let first = engine.query(&request).await.unwrap();
        // later writes are invisible until the entry expires
        store
            .write_points(&tokens(), &[TimeSeriesPoint::new(tokens(), start, 5.0)])
            .await
            .unwrap();
        let second = engine.query(&request).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.points[0].value, 1.0);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn fresh_requests_bypass_cache() {
        let start = closed_hour();
        let (engine, store) = engine_with(&[(start, 1.0)]).await;
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::hours(1)).unwrap(),
        )
        .with_resolution(Resolution::Interval(IntervalType::OneHour));

        engine.query(&request).await.unwrap();
        store
            .write_points(&tokens(), &[TimeSeriesPoint::new(tokens(), start, 5.0)])
            .await
            .unwrap();
        let fresh = engine.query(&request.clone().fresh()).await.unwrap();

        assert!(!fresh.from_cache);
        assert_eq!(fresh.points[0].value, 6.0);
    }

    #[tokio::test]
    async fn open_bucket_is_never_cached() {
        let now = Utc::now();
        let (engine, _store) = engine_with(&[(now - Duration::seconds(1), 2.0)]).await;
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(now - Duration::minutes(10), now + Duration::minutes(1)).unwrap(),
        )
        .with_resolution(Resolution::Raw);

        engine.query(&request).await.unwrap();
        let again = engine.query(&request).await.unwrap();

        assert!(!again.from_cache);
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn raw_range_limit_surfaces_to_caller() {
        let (engine, _store) = engine_with(&[]).await;
        let start = closed_hour() - Duration::days(3);
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::days(2)).unwrap(),
        )
        .with_resolution(Resolution::Raw);

        let err = engine.query(&request).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Store(StoreError::RangeTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn analyze_runs_over_resolved_series() {
        let start = closed_hour() - Duration::hours(5);
        let points: Vec<_> = (0..6)
            .map(|i| (start + Duration::hours(i), (i + 1) as f64 * 10.0))
            .collect();
        let (engine, _store) = engine_with(&points).await;
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::hours(6)).unwrap(),
        )
        .with_resolution(Resolution::Interval(IntervalType::OneHour))
        .with_aggregation(Aggregation::Sum);

        let analysis = engine.analyze(&request).await.unwrap();

        assert_eq!(analysis.summary.count, 6);
        assert_eq!(analysis.summary.sum, 210.0);
        assert!((analysis.trend.slope - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn analyze_of_empty_series_is_an_error() {
        let (engine, _store) = engine_with(&[]).await;
        let start = closed_hour();
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::hours(1)).unwrap(),
        )
        .with_resolution(Resolution::Interval(IntervalType::OneMinute));

        let err = engine.analyze(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::Analysis(AnalysisError::EmptySeries)));
    }

    #[tokio::test]
    async fn trend_over_sparse_buckets_follows_time() {
        let start = closed_hour() - Duration::hours(40);
        let points: Vec<_> = [(0, 10.0), (1, 0.0), (2, 0.0), (3, 0.0), (30, 6.0)]
            .iter()
            .map(|(hour, value)| (start + Duration::hours(*hour), *value))
            .collect();
        let (engine, _store) = engine_with(&points).await;
        let request = QueryRequest::new(
            tokens(),
            TimeRange::new(start, start + Duration::hours(31)).unwrap(),
        )
        .with_resolution(Resolution::Interval(IntervalType::OneHour))
        .with_aggregation(Aggregation::Sum);

        let result = engine.query(&request).await.unwrap();
        let trend = engine.trend(&request).await.unwrap();

        assert_eq!(result.points.len(), 5);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!(trend.slope > 0.0);
    }

    async fn busy_engine(points_per_minute: i64) -> (QueryEngine, TimeRange) {
        let store = Arc::new(InMemoryStore::new(StoreConfig {
            max_raw_points: 50,
            ..StoreConfig::default()
        }));
        let start = closed_hour() - Duration::hours(2);
        let points: Vec<_> = (0..60 * points_per_minute)
            .map(|i| {
                let offset = Duration::seconds(i * 60 / points_per_minute);
                TimeSeriesPoint::new(tokens(), start + offset, 1.0)
            })
            .collect();
        store.write_points(&tokens(), &points).await.unwrap();
        let engine = QueryEngine::new(store, &QueryCacheConfig::default());
        let range = TimeRange::new(start, start + Duration::hours(1)).unwrap();
        (engine, range)
    }

    #[tokio::test]
    async fn auto_falls_back_to_minute_buckets_when_raw_is_too_dense() {
        let (engine, range) = busy_engine(2).await;
        let request = QueryRequest::new(tokens(), range).with_aggregation(Aggregation::Sum);

        let result = engine.query(&request).await.unwrap();

        assert_eq!(result.interval, Some(IntervalType::OneMinute));
        assert_eq!(result.points.len(), 60);
        assert!(result.points.iter().all(|p| p.value == 2.0));
    }

    #[tokio::test]
    async fn explicit_raw_keeps_the_point_limit() {
        let (engine, range) = busy_engine(2).await;
        let request = QueryRequest::new(tokens(), range).with_resolution(Resolution::Raw);

        let err = engine.query(&request).await.unwrap_err();

        assert!(matches!(
            err,
            QueryError::Store(StoreError::RangeTooLarge {
                detail: RangeLimit::Points { max_points: 50 }
            })
        ));
    }
}
