//! Weighted fusion of the two detector scores

use serde::{Deserialize, Serialize};

use super::DetectorOutput;
use crate::tuning::{normalize_weights, TuningConfig, MAX_SENSITIVITY, MIN_SENSITIVITY};

/// Z-score magnitude treated as fully anomalous
pub const Z_REFERENCE_SCALE: f64 = 4.0;

/// EWMA residual score magnitude treated as fully anomalous
pub const EWMA_REFERENCE_SCALE: f64 = 5.0;

/// Threshold at the most sensitive setting
pub const MIN_THRESHOLD: f64 = 0.35;

/// Threshold at the least sensitive setting
pub const MAX_THRESHOLD: f64 = 0.75;

/// Decision produced by [`FusionScorer::fuse`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    /// Weighted score in `[0, 1]`
    pub fused: f64,
    pub threshold: f64,
    pub fired: bool,
    pub sufficient_data: bool,
}

/// Combines normalized detector outputs into one anomaly score
#[derive(Debug, Clone)]
pub struct FusionScorer {
    pub z_reference_scale: f64,
    pub ewma_reference_scale: f64,
}

impl FusionScorer {
    pub fn new() -> Self {
        Self {
            z_reference_scale: Z_REFERENCE_SCALE,
            ewma_reference_scale: EWMA_REFERENCE_SCALE,
        }
    }

    /// Map a raw detector score onto `[0, 1]` by magnitude
    pub fn normalize(score: f64, reference_scale: f64) -> f64 {
        if score.is_nan() {
            return 0.0;
        }
        (score.abs() / reference_scale).min(1.0)
    }

    /// Fuse the two detector outputs under `config`
    pub fn fuse(&self, z: &DetectorOutput, ewma: &DetectorOutput, config: &TuningConfig) -> FusionOutcome {
        let threshold = base_threshold(config.sensitivity);
        let sufficient_data = z.sufficient_data && ewma.sufficient_data;
        if !sufficient_data {
            return FusionOutcome {
                fused: 0.0,
                threshold,
                fired: false,
                sufficient_data,
            };
        }

        let [w_z, w_e] = normalize_weights(config.fusion_weights).unwrap_or(TuningConfig::DEFAULT_WEIGHTS);
        let norm_z = Self::normalize(z.score, self.z_reference_scale);
        let norm_e = Self::normalize(ewma.score, self.ewma_reference_scale);
        let fused = (w_z * norm_z + w_e * norm_e).clamp(0.0, 1.0);

        FusionOutcome {
            fused,
            threshold,
            fired: fused >= threshold,
            sufficient_data,
        }
    }
}

impl Default for FusionScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Firing threshold for a sensitivity level
///
/// Linear from 0.35 at sensitivity 1 to 0.75 at sensitivity 5. Out-of-range
/// values are clamped.
pub fn base_threshold(sensitivity: u8) -> f64 {
    let s = sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
    let span = (MAX_SENSITIVITY - MIN_SENSITIVITY) as f64;
    MIN_THRESHOLD + (s - MIN_SENSITIVITY) as f64 / span * (MAX_THRESHOLD - MIN_THRESHOLD)
}
