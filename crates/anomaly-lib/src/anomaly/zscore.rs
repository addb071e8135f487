//! Z-score deviation of the latest bucket
//!
//! Compares the most recent bucket against the mean and population standard
//! deviation of every earlier bucket in the window.

use super::{is_sufficient, mean, population_std_dev, DetectorOutput, FLAT_EPSILON};
use crate::models::DataPoint;

/// Score reported when the history is flat and the latest value differs
pub const DEFAULT_FLAT_SENTINEL: f64 = 8.0;

/// Standard-score detector
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    /// Magnitude reported instead of an infinite z-score
    pub flat_sentinel: f64,
}

impl ZScoreDetector {
    pub fn new() -> Self {
        Self {
            flat_sentinel: DEFAULT_FLAT_SENTINEL,
        }
    }

    pub fn with_flat_sentinel(mut self, sentinel: f64) -> Self {
        self.flat_sentinel = sentinel;
        self
    }

    /// Score `latest` against `history`
    ///
    /// # Arguments
    /// * `history` - Every bucket before the latest, oldest first
    /// * `latest` - The most recent bucket
    /// * `min_support` - Minimum total bucket count for a trustworthy score
    pub fn detect(&self, history: &[DataPoint], latest: &DataPoint, min_support: usize) -> DetectorOutput {
        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        let baseline = mean(&values);
        let std_dev = population_std_dev(&values);
        let diff = latest.value - baseline;

        let score = if std_dev <= FLAT_EPSILON {
            // Flat history: any difference is a hard deviation
            if diff.abs() <= FLAT_EPSILON {
                0.0
            } else {
                self.flat_sentinel.copysign(diff)
            }
        } else {
            diff / std_dev
        };

        DetectorOutput {
            score,
            baseline,
            sufficient_data: is_sufficient(history.len(), min_support),
        }
    }
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self::new()
    }
}
