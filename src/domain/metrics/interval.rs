//! Bucket widths for pre-aggregated metrics

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::metrics::constants::intervals;

/// Width of an aggregate bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntervalType {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl IntervalType {
    /// Every interval a point is aggregated into, finest first
    pub const ALL: [IntervalType; 4] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    pub fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => intervals::ONE_MINUTE_SECS,
            Self::FiveMinutes => intervals::FIVE_MINUTES_SECS,
            Self::OneHour => intervals::ONE_HOUR_SECS,
            Self::OneDay => intervals::ONE_DAY_SECS,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Start of the bucket covering `timestamp`: `floor(t / width) * width`
    pub fn bucket_start_secs(self, timestamp: DateTime<Utc>) -> i64 {
        let width = self.seconds();
        timestamp.timestamp().div_euclid(width) * width
    }

    pub fn bucket_start(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::from_timestamp(self.bucket_start_secs(timestamp), 0).unwrap_or(timestamp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for IntervalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown interval type: {0}")]
pub struct UnknownInterval(String);

impl FromStr for IntervalType {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            other => Err(UnknownInterval(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(IntervalType::OneMinute, "2024-03-01T10:17:00Z")]
    #[case(IntervalType::FiveMinutes, "2024-03-01T10:15:00Z")]
    #[case(IntervalType::OneHour, "2024-03-01T10:00:00Z")]
    #[case(IntervalType::OneDay, "2024-03-01T00:00:00Z")]
    fn floors_timestamp_to_bucket_start(#[case] interval: IntervalType, #[case] expected: &str) {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 17, 42).unwrap();
        let expected: DateTime<Utc> = expected.parse().unwrap();
        assert_eq!(interval.bucket_start(ts), expected);
    }

    #[test]
    fn floors_pre_epoch_timestamps_downwards() {
        let ts = DateTime::from_timestamp(-30, 0).unwrap();
        assert_eq!(IntervalType::OneMinute.bucket_start_secs(ts), -60);
    }

    #[test]
    fn parses_and_displays_short_names() {
        for interval in IntervalType::ALL {
            assert_eq!(interval.to_string().parse::<IntervalType>().unwrap(), interval);
        }
        assert!("2h".parse::<IntervalType>().is_err());
    }

    #[test]
    fn serializes_as_short_name() {
        assert_eq!(
            serde_json::to_string(&IntervalType::FiveMinutes).unwrap(),
            "\"5m\""
        );
    }
}
