//! Typed tuning configuration with validation at the boundary
//!
//! Operator input arrives as [`RawTuningConfig`] (every field optional and
//! loosely typed). The builder turns it into a [`TuningConfig`], either
//! falling back to defaults for malformed fields (`build`) or rejecting them
//! (`try_build`). Nothing untyped reaches the detectors.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::models::{cross_product, Metric, TuningKey, Window};
use crate::observability::EngineMetrics;

pub const MIN_SENSITIVITY: u8 = 1;
pub const MAX_SENSITIVITY: u8 = 5;
pub const DEFAULT_SENSITIVITY: u8 = 3;
pub const DEFAULT_MIN_SUPPORT: usize = 8;
pub const MIN_MIN_SUPPORT: usize = 2;

/// Allowed drift of the weight sum from 1 before renormalizing
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Tuning for one (metric, window) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningConfig {
    pub metric: Metric,
    pub window: Window,
    /// 1 = most sensitive, 5 = least sensitive
    pub sensitivity: u8,
    /// `[w_zscore, w_ewma]`, summing to 1
    pub fusion_weights: [f64; 2],
    /// Minimum bucket count before the pair is evaluated
    pub min_support: usize,
    /// Last update in epoch milliseconds
    pub updated_at: i64,
}

impl TuningConfig {
    pub const DEFAULT_WEIGHTS: [f64; 2] = [0.5, 0.5];

    pub fn defaults(metric: Metric, window: Window) -> Self {
        Self {
            metric,
            window,
            sensitivity: DEFAULT_SENSITIVITY,
            fusion_weights: Self::DEFAULT_WEIGHTS,
            min_support: DEFAULT_MIN_SUPPORT,
            updated_at: 0,
        }
    }

    pub fn builder(metric: Metric, window: Window) -> TuningConfigBuilder {
        TuningConfigBuilder::new(metric, window)
    }

    pub fn key(&self) -> TuningKey {
        TuningKey::new(self.metric, self.window)
    }
}

/// Loosely-typed operator input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTuningConfig {
    pub metric: String,
    pub window: String,
    #[serde(default)]
    pub sensitivity: Option<i64>,
    #[serde(default)]
    pub fusion_weights: Option<Vec<f64>>,
    #[serde(default)]
    pub min_support: Option<i64>,
}

impl RawTuningConfig {
    /// Builder seeded from this input; unknown metric/window names are errors
    pub fn into_builder(self) -> Result<TuningConfigBuilder> {
        let metric: Metric = self.metric.parse()?;
        let window: Window = self.window.parse()?;
        let mut builder = TuningConfigBuilder::new(metric, window);
        builder.sensitivity = self.sensitivity;
        builder.fusion_weights = self.fusion_weights;
        builder.min_support = self.min_support;
        Ok(builder)
    }
}

/// A field that was replaced by its default during `build`
#[derive(Debug, Clone, PartialEq)]
pub struct TuningFallback {
    pub key: TuningKey,
    pub field: &'static str,
    pub reason: String,
}

/// Builder for [`TuningConfig`]
#[derive(Debug, Clone)]
pub struct TuningConfigBuilder {
    metric: Metric,
    window: Window,
    sensitivity: Option<i64>,
    fusion_weights: Option<Vec<f64>>,
    min_support: Option<i64>,
    updated_at: i64,
}

impl TuningConfigBuilder {
    pub fn new(metric: Metric, window: Window) -> Self {
        Self {
            metric,
            window,
            sensitivity: None,
            fusion_weights: None,
            min_support: None,
            updated_at: 0,
        }
    }

    pub fn sensitivity(mut self, sensitivity: i64) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }

    pub fn fusion_weights(mut self, weights: impl Into<Vec<f64>>) -> Self {
        self.fusion_weights = Some(weights.into());
        self
    }

    pub fn min_support(mut self, min_support: i64) -> Self {
        self.min_support = Some(min_support);
        self
    }

    pub fn updated_at(mut self, updated_at_ms: i64) -> Self {
        self.updated_at = updated_at_ms;
        self
    }

    /// Resolve every field, replacing malformed ones with defaults
    pub fn resolve(self) -> (TuningConfig, Vec<TuningFallback>) {
        let key = TuningKey::new(self.metric, self.window);
        let mut fallbacks = Vec::new();
        let mut config = TuningConfig::defaults(self.metric, self.window);
        config.updated_at = self.updated_at;

        if let Some(s) = self.sensitivity {
            match check_sensitivity(s) {
                Ok(s) => config.sensitivity = s,
                Err(reason) => fallbacks.push(TuningFallback {
                    key,
                    field: "sensitivity",
                    reason,
                }),
            }
        }

        if let Some(ref w) = self.fusion_weights {
            match check_weights(w) {
                Ok(w) => config.fusion_weights = w,
                Err(reason) => fallbacks.push(TuningFallback {
                    key,
                    field: "fusionWeights",
                    reason,
                }),
            }
        }

        if let Some(m) = self.min_support {
            match check_min_support(m) {
                Ok(m) => config.min_support = m,
                Err(reason) => fallbacks.push(TuningFallback {
                    key,
                    field: "minSupport",
                    reason,
                }),
            }
        }

        (config, fallbacks)
    }

    /// Build, logging, counting and defaulting any malformed field
    pub fn build(self) -> TuningConfig {
        let (config, fallbacks) = self.resolve();
        if !fallbacks.is_empty() {
            EngineMetrics::new().inc_tuning_fallbacks(fallbacks.len() as u64);
        }
        for fb in &fallbacks {
            warn!(
                key = %fb.key,
                field = fb.field,
                reason = %fb.reason,
                "Invalid tuning value, using default"
            );
        }
        config
    }

    /// Build, rejecting any malformed field
    pub fn try_build(self) -> Result<TuningConfig> {
        let (config, fallbacks) = self.resolve();
        match fallbacks.into_iter().next() {
            None => Ok(config),
            Some(fb) => Err(EngineError::InvalidTuningConfig(format!(
                "{} {}: {}",
                fb.key, fb.field, fb.reason
            ))),
        }
    }
}

fn check_sensitivity(value: i64) -> std::result::Result<u8, String> {
    if (MIN_SENSITIVITY as i64..=MAX_SENSITIVITY as i64).contains(&value) {
        Ok(value as u8)
    } else {
        Err(format!(
            "sensitivity {} outside {}..={}",
            value, MIN_SENSITIVITY, MAX_SENSITIVITY
        ))
    }
}

fn check_weights(values: &[f64]) -> std::result::Result<[f64; 2], String> {
    let pair: [f64; 2] = values
        .try_into()
        .map_err(|_| format!("expected 2 weights, got {}", values.len()))?;
    normalize_weights(pair).ok_or_else(|| format!("weights {:?} cannot be normalized", pair))
}

fn check_min_support(value: i64) -> std::result::Result<usize, String> {
    if value >= MIN_MIN_SUPPORT as i64 {
        Ok(value as usize)
    } else {
        Err(format!("minSupport {} below {}", value, MIN_MIN_SUPPORT))
    }
}

/// Scale `weights` so they sum to 1
///
/// Returns `None` for negative or non-finite weights or a non-positive sum.
pub fn normalize_weights(weights: [f64; 2]) -> Option<[f64; 2]> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return None;
    }
    let sum = weights[0] + weights[1];
    if sum <= 0.0 {
        return None;
    }
    if (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE {
        return Some(weights);
    }
    Some([weights[0] / sum, weights[1] / sum])
}

/// Default configs for every (metric, window) pair
pub fn bootstrap_defaults(metrics: &[Metric], windows: &[Window]) -> Vec<TuningConfig> {
    cross_product(metrics, windows)
        .into_iter()
        .map(|k| TuningConfig::defaults(k.metric, k.window))
        .collect()
}
