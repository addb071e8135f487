//! Core data models for the anomaly engine

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Width of a single aggregation bucket
pub const BUCKET_MS: i64 = 60_000;

/// Monitored metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Errors,
    Calls,
    LatencyP95,
}

/// How raw samples are folded into a bucket value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Sum of sample values (event counts)
    Sum,
    /// Nearest-rank 95th percentile of sample values
    P95,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Errors, Metric::Calls, Metric::LatencyP95];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Errors => "errors",
            Metric::Calls => "calls",
            Metric::LatencyP95 => "latency_p95",
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        match self {
            Metric::Errors | Metric::Calls => Aggregation::Sum,
            Metric::LatencyP95 => Aggregation::P95,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "errors" => Ok(Metric::Errors),
            "calls" => Ok(Metric::Calls),
            "latency_p95" => Ok(Metric::LatencyP95),
            other => Err(EngineError::UnknownMetric(other.to_string())),
        }
    }
}

/// Lookback window evaluated for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::OneMinute, Window::FiveMinutes, Window::FifteenMinutes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::OneMinute => "1m",
            Window::FiveMinutes => "5m",
            Window::FifteenMinutes => "15m",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Window::OneMinute => Duration::from_secs(60),
            Window::FiveMinutes => Duration::from_secs(300),
            Window::FifteenMinutes => Duration::from_secs(900),
        }
    }

    /// Number of one-minute buckets covering the window
    pub fn bucket_count(&self) -> usize {
        (self.duration().as_secs() / 60) as usize
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Window {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Window::OneMinute),
            "5m" => Ok(Window::FiveMinutes),
            "15m" => Ok(Window::FifteenMinutes),
            other => Err(EngineError::UnknownWindow(other.to_string())),
        }
    }
}

/// Key of a tuning config and of one evaluation pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TuningKey {
    pub metric: Metric,
    pub window: Window,
}

impl TuningKey {
    pub fn new(metric: Metric, window: Window) -> Self {
        Self { metric, window }
    }
}

impl fmt::Display for TuningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.metric, self.window)
    }
}

/// Every (metric, window) pair drawn from the given lists
pub fn cross_product(metrics: &[Metric], windows: &[Window]) -> Vec<TuningKey> {
    metrics
        .iter()
        .flat_map(|m| windows.iter().map(move |w| TuningKey::new(*m, *w)))
        .collect()
}

/// Raw timestamped sample as produced by the time-series source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl RawSample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }

    /// A single event occurrence
    pub fn event(timestamp_ms: i64) -> Self {
        Self::new(timestamp_ms, 1.0)
    }
}

/// One aggregated one-minute bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub bucket_start_ms: i64,
    pub value: f64,
}

/// Severity tier of a fired anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Human-readable explanation attached to an anomaly event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub description: String,
    pub causes: Vec<String>,
    pub actions: Vec<String>,
}

/// Persisted record of a fired anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: String,
    /// Evaluation time in epoch milliseconds
    pub ts: i64,
    pub metric: Metric,
    pub window: Window,
    pub score: f64,
    pub severity: Severity,
    pub reason: String,
    pub insight: Insight,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<i64>,
}

/// Terminal status of one evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Skipped,
    NotFired,
    Fired,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Skipped => "skipped",
            EvaluationStatus::NotFired => "not_fired",
            EvaluationStatus::Fired => "fired",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result returned by a single `evaluate` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub metric: Metric,
    pub window: Window,
    pub status: EvaluationStatus,
    /// Fused score, absent when the run was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<AnomalyEvent>,
}
