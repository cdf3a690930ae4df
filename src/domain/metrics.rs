//! Time-series domain types
//!
//! Raw points, tag sets, bucket widths and the aggregate buckets that the
//! store maintains for every interval type.

pub mod bucket;
pub mod constants;
pub mod interval;
pub mod point;
pub mod time_period;

pub use bucket::{AggregateBucket, Aggregation, BucketBatch, BucketKey, BucketUpdate};
pub use interval::{IntervalType, UnknownInterval};
pub use point::{MetricName, SeriesPoint, Tags, TimeSeriesPoint};
pub use time_period::{RetentionDays, TimeRange, TimeRangeError};
