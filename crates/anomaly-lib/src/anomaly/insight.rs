//! Human-readable insight text for fired anomalies
//!
//! Output is a pure function of its inputs so it can be snapshot-tested.

use crate::models::{Insight, Metric, Severity, Window};

/// Machine-readable reason stored on every fused anomaly event
pub const FUSION_REASON: &str = "zscore+ewma fusion exceeded threshold";

/// Builds titles, descriptions, candidate causes and suggested actions
#[derive(Debug, Clone, Copy, Default)]
pub struct InsightGenerator;

impl InsightGenerator {
    pub fn generate(metric: Metric, severity: Severity, fused: f64, window: Window) -> Insight {
        let title = format!("{} anomaly detected ({})", metric, window);

        let description = format!(
            "{} deviated from its recent baseline in the latest minute of the {} window. \
             Fused anomaly score {:.2} ({:.0}% of full deviation), severity {}.",
            describe_metric(metric),
            window,
            fused,
            fused * 100.0,
            severity
        );

        let causes = candidate_causes(metric).iter().map(|c| c.to_string()).collect();

        let mut actions: Vec<String> = suggested_actions(metric).iter().map(|a| a.to_string()).collect();
        if severity == Severity::High {
            actions.push("page the on-call owner of the affected service".to_string());
        }

        Insight {
            title,
            description,
            causes,
            actions,
        }
    }
}

fn describe_metric(metric: Metric) -> &'static str {
    match metric {
        Metric::Errors => "Error count",
        Metric::Calls => "Call volume",
        Metric::LatencyP95 => "p95 latency",
    }
}

fn candidate_causes(metric: Metric) -> &'static [&'static str] {
    match metric {
        Metric::Errors => &[
            "recent deployment",
            "upstream dependency failure",
            "traffic spike",
        ],
        Metric::Calls => &["marketing campaign", "bot traffic", "client retry storm"],
        Metric::LatencyP95 => &[
            "resource saturation",
            "cold start",
            "downstream slowness",
        ],
    }
}

fn suggested_actions(metric: Metric) -> &'static [&'static str] {
    match metric {
        Metric::Errors => &[
            "check recent deploys",
            "inspect error logs for stack traces",
            "verify upstream dependency health",
        ],
        Metric::Calls => &[
            "compare traffic sources against the baseline",
            "check rate limiting and bot filters",
            "look for clients retrying in a loop",
        ],
        Metric::LatencyP95 => &[
            "check CPU and memory saturation",
            "inspect slow downstream calls",
            "review recent scaling events",
        ],
    }
}
