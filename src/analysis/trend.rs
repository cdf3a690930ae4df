//! Least-squares trend over a series
//!
//! [`trend`] fits against the sample index and suits evenly spaced values.
//! [`trend_over_time`] fits against each point's offset from the first
//! timestamp, measured in steps of the series resolution, so gaps between
//! buckets or irregular raw samples keep their real distance.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::AnalysisError;
use crate::domain::metrics::constants::statistical::{MIN_TREND_POINTS, TREND_SLOPE_THRESHOLD};
use crate::domain::metrics::SeriesPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn from_slope(slope: f64) -> Self {
        if slope > TREND_SLOPE_THRESHOLD {
            Self::Increasing
        } else if slope < -TREND_SLOPE_THRESHOLD {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        })
    }
}

/// Ordinary least squares fit of value against position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    pub direction: TrendDirection,
    /// Change in value per sample, or per step for [`trend_over_time`]
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation; 0 when either variable has no variance
    pub correlation: f64,
    /// `|correlation|`
    pub confidence: f64,
}

pub fn trend(values: &[f64]) -> Result<TrendFit, AnalysisError> {
    let positions: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    least_squares(&positions, values)
}

/// Fit against time, with x in units of `step` from the first point
///
/// `series` must be ordered by timestamp. A non-positive step is treated as
/// one second.
pub fn trend_over_time(
    series: &[SeriesPoint],
    step: Duration,
) -> Result<TrendFit, AnalysisError> {
    let step_ms = match step.num_milliseconds() {
        ms if ms > 0 => ms as f64,
        _ => 1000.0,
    };
    let origin = series.first().map(|p| p.timestamp);
    let positions: Vec<f64> = series
        .iter()
        .map(|p| match origin {
            Some(origin) => (p.timestamp - origin).num_milliseconds() as f64 / step_ms,
            None => 0.0,
        })
        .collect();
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    least_squares(&positions, &values)
}

fn least_squares(xs: &[f64], ys: &[f64]) -> Result<TrendFit, AnalysisError> {
    let n = ys.len();
    if n < MIN_TREND_POINTS {
        return Err(AnalysisError::InsufficientData {
            required: MIN_TREND_POINTS,
            actual: n,
        });
    }
    if let Some(index) = ys.iter().position(|v| !v.is_finite()) {
        return Err(AnalysisError::NonFiniteValue { index });
    }

    let count = n as f64;
    let mean_x = xs.iter().sum::<f64>() / count;
    let mean_y = ys.iter().sum::<f64>() / count;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    // all samples at one position carry no slope
    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    let intercept = mean_y - slope * mean_x;
    let correlation = if sxx == 0.0 || syy == 0.0 {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };

    Ok(TrendFit {
        direction: TrendDirection::from_slope(slope),
        slope,
        intercept,
        correlation,
        confidence: correlation.abs(),
    })
}
