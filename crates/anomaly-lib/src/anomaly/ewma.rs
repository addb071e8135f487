//! EWMA deviation of the latest bucket
//!
//! The moving average is recomputed from the bucket sequence on every call;
//! nothing is carried between evaluations.

use super::{is_sufficient, population_std_dev, DetectorOutput, FLAT_EPSILON};
use crate::models::DataPoint;

/// Floor for the residual standard deviation
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Exponentially weighted moving average detector
#[derive(Debug, Clone)]
pub struct EwmaDetector {
    /// Lower bound applied to the residual std dev before dividing
    pub epsilon: f64,
}

impl EwmaDetector {
    pub fn new() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Decay factor for a sequence of `buckets` points
    pub fn alpha(buckets: usize) -> f64 {
        2.0 / (buckets as f64 + 1.0)
    }

    /// EWMA series over `values` with decay `alpha`
    pub fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(values.len());
        let mut prev = match values.first() {
            Some(v) => *v,
            None => return out,
        };
        out.push(prev);
        for v in &values[1..] {
            prev = alpha * v + (1.0 - alpha) * prev;
            out.push(prev);
        }
        out
    }

    /// Score `latest` against the EWMA of `history`
    pub fn detect(&self, history: &[DataPoint], latest: &DataPoint, min_support: usize) -> DetectorOutput {
        let sufficient_data = is_sufficient(history.len(), min_support);
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();

        // Total bucket count includes the latest point
        let alpha = Self::alpha(values.len() + 1);
        let ewma = Self::smooth(&values, alpha);
        let baseline = match ewma.last() {
            Some(v) => *v,
            None => {
                return DetectorOutput {
                    score: 0.0,
                    baseline: latest.value,
                    sufficient_data,
                }
            }
        };

        let residuals: Vec<f64> = values.iter().zip(&ewma).map(|(v, e)| v - e).collect();
        let deviation = population_std_dev(&residuals);
        let diff = latest.value - baseline;

        let score = if deviation <= FLAT_EPSILON && diff.abs() <= FLAT_EPSILON {
            0.0
        } else {
            diff / deviation.max(self.epsilon)
        };

        DetectorOutput {
            score,
            baseline,
            sufficient_data,
        }
    }
}

impl Default for EwmaDetector {
    fn default() -> Self {
        Self::new()
    }
}
