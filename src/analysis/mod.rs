//! Statistical analysis of queried series
//!
//! Every function here is pure and deterministic: the same input always
//! produces bit-identical output, so results can be recomputed from
//! aggregated buckets after raw points have expired.

pub mod anomaly;
pub mod seasonality;
pub mod summary;
pub mod trend;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::metrics::SeriesPoint;

pub use anomaly::{anomalies, Anomaly, Severity};
pub use seasonality::{seasonality, Seasonality};
pub use summary::{summary, Percentile, Summary};
pub use trend::{trend, trend_over_time, TrendDirection, TrendFit};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("Series is empty")]
    EmptySeries,

    #[error("Need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Value at index {index} is not finite")]
    NonFiniteValue { index: usize },
}

/// Population variance (divides by n)
pub(crate) fn population_variance(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Trend, seasonality and anomalies for one series
///
/// Derived on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub slope: f64,
    pub confidence: f64,
    pub seasonality: Seasonality,
    pub anomalies: Vec<Anomaly>,
}

/// `step` is the series resolution; the slope is reported per step
pub fn analyze_trend(
    series: &[SeriesPoint],
    step: Duration,
) -> Result<TrendAnalysis, AnalysisError> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let fit = trend_over_time(series, step)?;
    Ok(TrendAnalysis {
        direction: fit.direction,
        slope: fit.slope,
        confidence: fit.confidence,
        seasonality: seasonality(&values),
        anomalies: anomalies(series),
    })
}

/// Summary plus trend analysis of a resolved series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesAnalysis {
    pub summary: Summary,
    pub trend: TrendAnalysis,
}

pub fn analyze_series(
    series: &[SeriesPoint],
    step: Duration,
) -> Result<SeriesAnalysis, AnalysisError> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    Ok(SeriesAnalysis {
        summary: summary(&values)?,
        trend: analyze_trend(series, step)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn ramp(n: i64) -> Vec<SeriesPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| SeriesPoint::new(start + Duration::seconds(i), (i + 1) as f64))
            .collect()
    }

    #[test]
    fn ramp_analysis_combines_all_views() {
        let analysis = analyze_series(&ramp(10), Duration::seconds(1)).unwrap();
        assert_eq!(analysis.summary.count, 10);
        assert_eq!(analysis.trend.direction, TrendDirection::Increasing);
        assert!(analysis.trend.slope > 0.0);
        assert!(analysis.trend.confidence > 0.99);
        assert!(analysis.trend.anomalies.is_empty());
    }

    #[test]
    fn sparse_hourly_series_trends_by_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series: Vec<SeriesPoint> = [(0, 10.0), (1, 0.0), (2, 0.0), (3, 0.0), (30, 6.0)]
            .iter()
            .map(|(hour, value)| SeriesPoint::new(start + Duration::hours(*hour), *value))
            .collect();

        let analysis = analyze_trend(&series, Duration::hours(1)).unwrap();

        assert_eq!(analysis.direction, TrendDirection::Increasing);
        assert!(analysis.slope > 0.0);
    }

    #[test]
    fn short_series_reports_insufficient_data() {
        assert!(matches!(
            analyze_series(&ramp(2), Duration::seconds(1)),
            Err(AnalysisError::InsufficientData { .. })
        ));
        assert_eq!(
            analyze_series(&[], Duration::seconds(1)).unwrap_err(),
            AnalysisError::EmptySeries
        );
    }
}
