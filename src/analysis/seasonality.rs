//! Autocorrelation scan for periodic behaviour

use serde::{Deserialize, Serialize};

use crate::domain::metrics::constants::statistical::{
    MAX_SEASONALITY_LAG, SEASONALITY_LAG_DIVISOR, SEASONALITY_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub detected: bool,
    /// Lag, in samples, of the strongest autocorrelation when detected
    pub period: Option<usize>,
    /// Strongest autocorrelation found over the scanned lags
    pub strength: f64,
}

impl Seasonality {
    pub fn none() -> Self {
        Self {
            detected: false,
            period: None,
            strength: 0.0,
        }
    }
}

/// Sample autocorrelation at `lag`, normalised by the lag-0 sum of squares
pub fn autocorrelation(values: &[f64], mean: f64, lag: usize) -> f64 {
    let denominator: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    if denominator == 0.0 || lag >= values.len() {
        return 0.0;
    }
    let numerator: f64 = values
        .iter()
        .zip(&values[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum();
    numerator / denominator
}

/// Scan lags `1..=min(n/4, 50)` and report the strongest if it exceeds 0.5
///
/// Ties resolve to the smaller lag.
pub fn seasonality(values: &[f64]) -> Seasonality {
    let max_lag = (values.len() / SEASONALITY_LAG_DIVISOR).min(MAX_SEASONALITY_LAG);
    if max_lag == 0 || values.iter().any(|v| !v.is_finite()) {
        return Seasonality::none();
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let mut best: Option<(usize, f64)> = None;
    for lag in 1..=max_lag {
        let correlation = autocorrelation(values, mean, lag);
        if best.is_none_or(|(_, strongest)| correlation > strongest) {
            best = Some((lag, correlation));
        }
    }

    match best {
        Some((lag, strength)) if strength > SEASONALITY_THRESHOLD => Seasonality {
            detected: true,
            period: Some(lag),
            strength,
        },
        Some((_, strength)) => Seasonality {
            detected: false,
            period: None,
            strength,
        },
        None => Seasonality::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_repeating_pattern() {
        let values: Vec<f64> = (0..48).map(|i| [1.0, 5.0, 9.0, 5.0][i % 4]).collect();
        let result = seasonality(&values);
        assert!(result.detected);
        assert_eq!(result.period, Some(4));
        assert!(result.strength > 0.5);
    }

    #[test]
    fn alternating_series_has_period_two() {
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.0 } else { 10.0 }).collect();
        let result = seasonality(&values);
        assert!(result.detected);
        assert_eq!(result.period, Some(2));
    }

    #[test]
    fn short_or_constant_series_is_not_seasonal() {
        assert_eq!(seasonality(&[1.0, 2.0, 3.0]), Seasonality::none());
        assert!(!seasonality(&[4.0; 40]).detected);
    }

    #[test]
    fn lags_beyond_a_quarter_of_the_series_are_not_scanned() {
        let pattern = [0.0, 0.0, 10.0, 10.0];
        let short: Vec<f64> = (0..8).map(|i| pattern[i % 4]).collect();
        assert!(!seasonality(&short).detected);

        let long: Vec<f64> = (0..16).map(|i| pattern[i % 4]).collect();
        assert_eq!(seasonality(&long).period, Some(4));
    }
}
