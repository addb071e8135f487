//! Observability infrastructure for the anomaly engine
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, outcomes, fired anomalies, failures)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::models::{AnomalyEvent, EvaluationStatus, Metric, Severity, Window};

/// Histogram buckets for evaluation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    evaluation_latency_seconds: Histogram,
    evaluations_total: IntCounterVec,
    anomalies_total: IntCounterVec,
    source_errors_total: IntCounter,
    persistence_errors_total: IntCounter,
    tuning_fallbacks_total: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "anomaly_engine_evaluation_latency_seconds",
                "Time spent evaluating one (metric, window) pair",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            evaluations_total: register_int_counter_vec!(
                "anomaly_engine_evaluations_total",
                "Evaluation runs by terminal status",
                &["status"]
            )
            .expect("Failed to register evaluations_total"),

            anomalies_total: register_int_counter_vec!(
                "anomaly_engine_anomalies_total",
                "Anomaly events fired by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_total"),

            source_errors_total: register_int_counter!(
                "anomaly_engine_source_errors_total",
                "Runs aborted because the time-series source failed"
            )
            .expect("Failed to register source_errors_total"),

            persistence_errors_total: register_int_counter!(
                "anomaly_engine_persistence_errors_total",
                "Fired anomalies that could not be written"
            )
            .expect("Failed to register persistence_errors_total"),

            tuning_fallbacks_total: register_int_counter!(
                "anomaly_engine_tuning_fallbacks_total",
                "Tuning values replaced by defaults, per invalid field or failed store read"
            )
            .expect("Failed to register tuning_fallbacks_total"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_evaluation(&self, status: EvaluationStatus) {
        self.inner()
            .evaluations_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn inc_anomaly(&self, severity: Severity) {
        self.inner()
            .anomalies_total
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn inc_source_errors(&self) {
        self.inner().source_errors_total.inc();
    }

    pub fn inc_persistence_errors(&self) {
        self.inner().persistence_errors_total.inc();
    }

    pub fn inc_tuning_fallbacks(&self, count: u64) {
        self.inner().tuning_fallbacks_total.inc_by(count);
    }

    pub fn tuning_fallbacks(&self) -> u64 {
        self.inner().tuning_fallbacks_total.get()
    }

    pub fn evaluations(&self, status: EvaluationStatus) -> u64 {
        self.inner()
            .evaluations_total
            .with_label_values(&[status.as_str()])
            .get()
    }
}

/// Structured logger for engine events
///
/// Emits one consistently-shaped event per evaluation outcome.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_anomaly(&self, event: &AnomalyEvent, threshold: f64) {
        match event.severity {
            Severity::High => {
                warn!(
                    event = "anomaly_fired",
                    node = %self.node_name,
                    anomaly_id = %event.id,
                    metric = %event.metric,
                    window = %event.window,
                    score = event.score,
                    threshold = threshold,
                    severity = %event.severity,
                    title = %event.insight.title,
                    "High severity anomaly fired"
                );
            }
            _ => {
                info!(
                    event = "anomaly_fired",
                    node = %self.node_name,
                    anomaly_id = %event.id,
                    metric = %event.metric,
                    window = %event.window,
                    score = event.score,
                    threshold = threshold,
                    severity = %event.severity,
                    title = %event.insight.title,
                    "Anomaly fired"
                );
            }
        }
    }

    pub fn log_skipped(&self, metric: Metric, window: Window, buckets: usize, min_support: usize) {
        debug!(
            event = "evaluation_skipped",
            node = %self.node_name,
            metric = %metric,
            window = %window,
            buckets = buckets,
            min_support = min_support,
            "Insufficient data, evaluation skipped"
        );
    }

    pub fn log_not_fired(&self, metric: Metric, window: Window, fused: f64, threshold: f64) {
        debug!(
            event = "evaluation_completed",
            node = %self.node_name,
            metric = %metric,
            window = %window,
            fused = fused,
            threshold = threshold,
            "Evaluation completed below threshold"
        );
    }

    pub fn log_failure(&self, metric: Metric, window: Window, error: &str) {
        warn!(
            event = "evaluation_failed",
            node = %self.node_name,
            metric = %metric,
            window = %window,
            error = %error,
            "Evaluation failed, will retry next tick"
        );
    }

    /// A fired anomaly that could not be persisted; the computed result is kept in the log
    pub fn log_unpersisted(&self, event: &AnomalyEvent, error: &str) {
        warn!(
            event = "anomaly_unpersisted",
            node = %self.node_name,
            anomaly_id = %event.id,
            metric = %event.metric,
            window = %event.window,
            score = event.score,
            severity = %event.severity,
            error = %error,
            "Anomaly fired but event write failed"
        );
    }

    pub fn log_acknowledged(&self, id: &str, at_ms: i64, transitioned: bool) {
        info!(
            event = "event_acknowledged",
            node = %self.node_name,
            anomaly_id = %id,
            acknowledged_at = at_ms,
            transitioned = transitioned,
            "Anomaly event acknowledged"
        );
    }

    pub fn log_startup(&self, version: &str, pairs: usize) {
        info!(
            event = "engine_started",
            node = %self.node_name,
            version = %version,
            pairs = pairs,
            "Anomaly engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Anomaly engine shutting down"
        );
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}
