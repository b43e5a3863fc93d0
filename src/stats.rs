//! Reduction of repeated-trial samples

use serde::{Deserialize, Serialize};

/// Mean, population standard deviation and range of a sample set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    /// Reduce `values`. An empty slice yields all zeros.
    pub fn from_samples(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let (sum, sum_sq) = values
            .iter()
            .fold((0.0f64, 0.0f64), |(s, ss), &v| (s + v, ss + v * v));
        let mean = sum / n;
        // Cancellation can push the variance slightly negative
        let variance = (sum_sq / n - mean * mean).max(0.0);

        Self {
            mean,
            stddev: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// `(mean, stddev, min, max)`
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.mean, self.stddev, self.min, self.max)
    }
}
