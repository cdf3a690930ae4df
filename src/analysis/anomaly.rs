//! Sigma-band outlier detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::population_variance;
use crate::domain::metrics::constants::statistical::{HIGH_ANOMALY_SIGMA, MEDIUM_ANOMALY_SIGMA};
use crate::domain::metrics::SeriesPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
    pub severity: Severity,
}

/// Flag points beyond 2σ (medium) and 3σ (high) of the series mean
///
/// Uses the population standard deviation. A series without variance has no
/// anomalies.
pub fn anomalies(series: &[SeriesPoint]) -> Vec<Anomaly> {
    if series.len() < 2 || series.iter().any(|p| !p.value.is_finite()) {
        return Vec::new();
    }

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let std_dev = population_variance(&values, mean).sqrt();
    if std_dev == 0.0 {
        return Vec::new();
    }

    series
        .iter()
        .filter_map(|point| {
            let z_score = (point.value - mean) / std_dev;
            let severity = if z_score.abs() > HIGH_ANOMALY_SIGMA {
                Severity::High
            } else if z_score.abs() > MEDIUM_ANOMALY_SIGMA {
                Severity::Medium
            } else {
                return None;
            };
            Some(Anomaly {
                timestamp: point.timestamp,
                value: point.value,
                z_score,
                severity,
            })
        })
        .collect()
}
