//! Statistical anomaly detection over bucketed time series
//!
//! This module provides:
//! - Z-score deviation against the window's history
//! - EWMA deviation against an exponentially smoothed baseline
//! - Weighted fusion of both scores into one decision
//! - Severity classification and insight text for fired anomalies

mod ewma;
mod fusion;
mod insight;
mod severity;
mod zscore;

pub use ewma::{EwmaDetector, DEFAULT_EPSILON};
pub use fusion::{
    base_threshold, FusionOutcome, FusionScorer, EWMA_REFERENCE_SCALE, MAX_THRESHOLD,
    MIN_THRESHOLD, Z_REFERENCE_SCALE,
};
pub use insight::{InsightGenerator, FUSION_REASON};
pub use severity::{SeverityClassifier, HIGH_RATIO, MEDIUM_RATIO};
pub use zscore::{ZScoreDetector, DEFAULT_FLAT_SENTINEL};

use serde::{Deserialize, Serialize};

use crate::models::DataPoint;

/// Standard deviations at or below this are treated as zero
pub(crate) const FLAT_EPSILON: f64 = 1e-9;

/// Output of a single detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorOutput {
    /// Unit-less deviation score, comparable only after normalization
    pub score: f64,
    /// Expected value the latest bucket was compared against
    pub baseline: f64,
    pub sufficient_data: bool,
}

/// Split a bucket sequence into `(history, latest)`
pub fn split_latest(points: &[DataPoint]) -> Option<(&[DataPoint], &DataPoint)> {
    points.split_last().map(|(latest, history)| (history, latest))
}

/// `len(history) >= min_support - 1`, i.e. the full window has enough buckets
pub(crate) fn is_sufficient(history_len: usize, min_support: usize) -> bool {
    history_len + 1 >= min_support
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N)
pub(crate) fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
