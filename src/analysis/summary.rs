//! Descriptive statistics over a set of values

use serde::{Deserialize, Serialize};

use crate::analysis::{population_variance, AnalysisError};
use crate::domain::metrics::constants::statistical::{IQR_OUTLIER_FACTOR, SUMMARY_PERCENTILES};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentile {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    /// Every value sharing the highest frequency; empty when all are distinct
    pub modes: Vec<f64>,
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub percentiles: Vec<Percentile>,
    /// Values outside `[q1 - 1.5 * iqr, q3 + 1.5 * iqr]`, in input order
    pub outliers: Vec<f64>,
}

impl Summary {
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| p.percentile == percentile)
            .map(|p| p.value)
    }
}

/// Linear interpolation between the order statistics around rank `p/100 * (n-1)`
///
/// `sorted` must be non-empty and ascending.
pub fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn modes_of_sorted(sorted: &[f64]) -> Vec<f64> {
    if sorted.len() == 1 {
        return sorted.to_vec();
    }

    let mut runs: Vec<(f64, usize)> = Vec::new();
    for &value in sorted {
        match runs.last_mut() {
            Some((current, count)) if *current == value => *count += 1,
            _ => runs.push((value, 1)),
        }
    }

    let highest = runs.iter().map(|(_, count)| *count).max().unwrap_or(0);
    if highest <= 1 {
        return Vec::new();
    }
    runs.into_iter()
        .filter(|(_, count)| *count == highest)
        .map(|(value, _)| value)
        .collect()
}

pub fn summary(values: &[f64]) -> Result<Summary, AnalysisError> {
    if values.is_empty() {
        return Err(AnalysisError::EmptySeries);
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(AnalysisError::NonFiniteValue { index });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let count = values.len();
    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;
    let variance = population_variance(values, mean);
    let min = sorted[0];
    let max = sorted[count - 1];

    let q1 = percentile_of_sorted(&sorted, 25.0);
    let q3 = percentile_of_sorted(&sorted, 75.0);
    let iqr = q3 - q1;
    let low_fence = q1 - IQR_OUTLIER_FACTOR * iqr;
    let high_fence = q3 + IQR_OUTLIER_FACTOR * iqr;

    Ok(Summary {
        count,
        sum,
        mean,
        median: percentile_of_sorted(&sorted, 50.0),
        modes: modes_of_sorted(&sorted),
        variance,
        std_dev: variance.sqrt(),
        min,
        max,
        range: max - min,
        percentiles: SUMMARY_PERCENTILES
            .iter()
            .map(|&percentile| Percentile {
                percentile,
                value: percentile_of_sorted(&sorted, percentile),
            })
            .collect(),
        outliers: values
            .iter()
            .copied()
            .filter(|v| *v < low_fence || *v > high_fence)
            .collect(),
    })
}
