//! Property-based tests for aggregation invariants
//!
//! These tests check that bucket state is independent of delivery count,
//! batch order and the interval it is read at.

mod aggregation_invariants;

use chat_analytics::domain::metrics::{MetricName, Tags, TimeSeriesPoint};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

// Property test generators
pub mod generators {
    use super::*;

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    pub fn metric() -> MetricName {
        MetricName::try_new("tokens").unwrap()
    }

    /// Integer-valued samples keep float sums exact under reordering
    pub fn point_in_day() -> impl Strategy<Value = TimeSeriesPoint> {
        (0i64..86_400, 0u32..10_000, prop::sample::select(vec!["gpt-4o", "claude"]))
            .prop_map(|(offset, value, model)| {
                TimeSeriesPoint::new(metric(), base_time() + Duration::seconds(offset), value as f64)
                    .with_tags(Tags::new().with("model", model))
            })
    }

    pub fn points() -> impl Strategy<Value = Vec<TimeSeriesPoint>> {
        prop::collection::vec(point_in_day(), 1..200)
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}
