//! Query requests and the resolution they are answered at

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::metrics::{Aggregation, IntervalType, MetricName, Tags, TimeRange};
use crate::store::SeriesQuery;

/// Granularity a query is answered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Individual raw points
    Raw,
    Interval(IntervalType),
    /// Picked from the width of the range
    #[default]
    Auto,
}

impl Resolution {
    /// The bucket interval to read, or `None` for raw points
    pub fn resolve(self, range: &TimeRange) -> Option<IntervalType> {
        match self {
            Self::Raw => None,
            Self::Interval(interval) => Some(interval),
            Self::Auto => auto_interval(range.span()),
        }
    }
}

fn auto_interval(span: Duration) -> Option<IntervalType> {
    if span <= Duration::hours(1) {
        None
    } else if span <= Duration::hours(6) {
        Some(IntervalType::OneMinute)
    } else if span <= Duration::days(1) {
        Some(IntervalType::FiveMinutes)
    } else if span <= Duration::days(30) {
        Some(IntervalType::OneHour)
    } else {
        Some(IntervalType::OneDay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    metric: MetricName,
    range: TimeRange,
    resolution: Resolution,
    aggregation: Aggregation,
    tags: Tags,
    fresh: bool,
}

impl QueryRequest {
    pub fn new(metric: MetricName, range: TimeRange) -> Self {
        Self {
            metric,
            range,
            resolution: Resolution::Auto,
            aggregation: Aggregation::default(),
            tags: Tags::new(),
            fresh: false,
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
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

    /// Bypass the cache for this request
    pub fn fresh(mut self) -> Self {
        self.fresh = true;
        self
    }

    pub fn metric(&self) -> &MetricName {
        &self.metric
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn interval(&self) -> Option<IntervalType> {
        self.resolution.resolve(&self.range)
    }

    pub fn key(&self) -> QueryKey {
        QueryKey {
            metric: self.metric.clone(),
            range: self.range,
            interval: self.interval(),
            aggregation: self.aggregation,
            tags: self.tags.clone(),
        }
    }

    pub fn to_series_query(&self) -> SeriesQuery {
        let query = SeriesQuery::new(self.metric.clone(), self.range)
            .with_aggregation(self.aggregation)
            .with_tags(self.tags.clone());
        match self.interval() {
            Some(interval) => query.with_interval(interval),
            None => query,
        }
    }
}

/// Cache key: a request after its resolution has been resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub metric: MetricName,
    pub range: TimeRange,
    pub interval: Option<IntervalType>,
    pub aggregation: Aggregation,
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn range_of(span: Duration) -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TimeRange::new(start, start + span).unwrap()
    }

    #[rstest]
    #[case(Duration::minutes(30), None)]
    #[case(Duration::hours(1), None)]
    #[case(Duration::hours(2), Some(IntervalType::OneMinute))]
    #[case(Duration::hours(6), Some(IntervalType::OneMinute))]
    #[case(Duration::hours(12), Some(IntervalType::FiveMinutes))]
    #[case(Duration::days(7), Some(IntervalType::OneHour))]
    #[case(Duration::days(30), Some(IntervalType::OneHour))]
    #[case(Duration::days(90), Some(IntervalType::OneDay))]
    fn auto_resolution_follows_range_width(
        #[case] span: Duration,
        #[case] expected: Option<IntervalType>,
    ) {
        assert_eq!(Resolution::Auto.resolve(&range_of(span)), expected);
    }

    #[test]
    fn explicit_resolution_wins() {
        let range = range_of(Duration::days(90));
        assert_eq!(Resolution::Raw.resolve(&range), None);
        assert_eq!(
            Resolution::Interval(IntervalType::FiveMinutes).resolve(&range),
            Some(IntervalType::FiveMinutes)
        );
    }

    #[test]
    fn keys_differ_by_aggregation_and_tags() {
        let metric = MetricName::try_new("tokens").unwrap();
        let base = QueryRequest::new(metric, range_of(Duration::hours(3)));
        let by_sum = base.clone().key();
        let by_max = base.clone().with_aggregation(Aggregation::Max).key();
        let tagged = base.with_tags(Tags::new().with("model", "gpt-4o")).key();

        assert_ne!(by_sum, by_max);
        assert_ne!(by_sum, tagged);
        assert_eq!(by_sum.interval, Some(IntervalType::OneMinute));
    }

    #[test]
    fn series_query_carries_resolved_interval() {
        let metric = MetricName::try_new("tokens").unwrap();
        let raw = QueryRequest::new(metric.clone(), range_of(Duration::minutes(10)));
        assert_eq!(raw.to_series_query().interval, None);

        let daily = QueryRequest::new(metric, range_of(Duration::minutes(10)))
            .with_resolution(Resolution::Interval(IntervalType::OneDay));
        assert_eq!(daily.to_series_query().interval, Some(IntervalType::OneDay));
    }
}
