//! Time ranges and retention periods

use chrono::{DateTime, Duration, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of days raw points are retained
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3650),
    default = 30,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Hash,
        Display
    )
)]
pub struct RetentionDays(u32);

impl RetentionDays {
    pub fn as_duration(&self) -> Duration {
        Duration::days(i64::from(self.into_inner()))
    }

    /// Raw points older than this are removed
    pub fn raw_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.as_duration()
    }

    /// Buckets ending at or before this are removed
    pub fn bucket_cutoff(&self, now: DateTime<Utc>, multiplier: u32) -> DateTime<Utc> {
        now - self.as_duration() * multiplier.max(1) as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeRangeError {
    #[error("Range end {end} must be after start {start}")]
    EndNotAfterStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        if end <= start {
            return Err(TimeRangeError::EndNotAfterStart { start, end });
        }
        Ok(Self { start, end })
    }

    /// The range ending now and spanning `span`
    pub fn last(span: Duration) -> Result<Self, TimeRangeError> {
        let end = Utc::now();
        Self::new(end - span, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn retention_days_are_bounded() {
        assert!(RetentionDays::try_new(0).is_err());
        assert!(RetentionDays::try_new(1).is_ok());
        assert!(RetentionDays::try_new(3650).is_ok());
        assert!(RetentionDays::try_new(3651).is_err());
        assert_eq!(RetentionDays::default().into_inner(), 30);
    }

    #[test]
    fn bucket_cutoff_is_a_multiple_of_raw_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let days = RetentionDays::try_new(2).unwrap();
        assert_eq!(days.raw_cutoff(now), now - Duration::days(2));
        assert_eq!(days.bucket_cutoff(now, 7), now - Duration::days(14));
    }

    #[test]
    fn ranges_are_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, start + Duration::minutes(1)).unwrap();
        assert!(range.contains(start));
        assert!(!range.contains(range.end()));
        assert_eq!(range.span(), Duration::minutes(1));
    }

    #[test]
    fn empty_and_inverted_ranges_are_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeRange::new(start, start).is_err());
        assert!(TimeRange::new(start, start - Duration::seconds(1)).is_err());
    }
}
