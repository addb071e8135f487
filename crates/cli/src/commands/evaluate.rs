//! Dry-run evaluation against a directory of sample files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anomaly_lib::{
    cross_product, AnomalyEngine, AnomalyEventStore, EvaluationResult, EvaluationStatus,
    FileEventStore, FileSampleSource, InMemoryEventStore, InMemoryTuningStore, ManualClock,
    Metric, TuningCache, TuningConfig, TuningConfigStore, Window,
};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    color_severity, color_status, format_score, format_timestamp, print_info, print_rows,
    OutputFormat,
};

/// Tuning flags shared by every evaluated pair
#[derive(Debug, Clone, Default)]
pub struct TuningFlags {
    pub sensitivity: Option<i64>,
    pub weights: Option<Vec<f64>>,
    pub min_support: Option<i64>,
}

impl TuningFlags {
    /// Strictly validated config for one pair
    pub fn config_for(&self, metric: Metric, window: Window, now_ms: i64) -> Result<TuningConfig> {
        let mut builder = TuningConfig::builder(metric, window).updated_at(now_ms);
        if let Some(s) = self.sensitivity {
            builder = builder.sensitivity(s);
        }
        if let Some(w) = &self.weights {
            builder = builder.fusion_weights(w.clone());
        }
        if let Some(m) = self.min_support {
            builder = builder.min_support(m);
        }
        Ok(builder.try_build()?)
    }
}

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Fused")]
    fused: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Event")]
    event: String,
}

#[derive(Serialize)]
struct PreviewOutput<'a> {
    metric: Metric,
    window: Window,
    now_ms: i64,
    buckets: &'a [anomaly_lib::DataPoint],
}

async fn build_engine(
    samples_dir: &Path,
    now_ms: i64,
    tuning: Vec<TuningConfig>,
    events: Arc<dyn AnomalyEventStore>,
) -> Result<AnomalyEngine> {
    let clock = Arc::new(ManualClock::new(now_ms));
    let store = Arc::new(InMemoryTuningStore::new());
    store.put(tuning).await?;
    let cache = Arc::new(TuningCache::new(store, clock.clone()));
    let source = Arc::new(FileSampleSource::new(samples_dir));
    Ok(AnomalyEngine::new(source, cache, events).with_clock(clock))
}

/// Print the buckets a pair would be evaluated on
pub async fn preview(
    samples_dir: &Path,
    metric: Metric,
    window: Window,
    now_ms: i64,
    format: OutputFormat,
) -> Result<()> {
    let engine = build_engine(
        samples_dir,
        now_ms,
        Vec::new(),
        Arc::new(InMemoryEventStore::new()),
    )
    .await?;
    let buckets = engine
        .preview_buckets(metric, window)
        .await
        .with_context(|| format!("failed to read samples for {}", metric))?;

    if let OutputFormat::Table = format {
        println!(
            "{} {} over {} ending {}",
            "Buckets".bold(),
            metric.to_string().cyan(),
            window,
            format_timestamp(now_ms)
        );
    }

    let rows: Vec<BucketRow> = buckets
        .iter()
        .map(|p| BucketRow {
            bucket: format_timestamp(p.bucket_start_ms),
            value: format!("{}", p.value),
        })
        .collect();
    print_rows(
        rows,
        &PreviewOutput {
            metric,
            window,
            now_ms,
            buckets: &buckets,
        },
        format,
    )
}

/// Evaluate every requested pair once
///
/// Without `events_path` fired anomalies are only printed; with it they are
/// appended to that event store.
pub async fn evaluate(
    samples_dir: &Path,
    metrics: &[Metric],
    windows: &[Window],
    now_ms: i64,
    flags: &TuningFlags,
    events_path: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let pairs = cross_product(metrics, windows);
    let tuning = pairs
        .iter()
        .map(|k| flags.config_for(k.metric, k.window, now_ms))
        .collect::<Result<Vec<_>>>()?;

    let events: Arc<dyn AnomalyEventStore> = match &events_path {
        Some(path) => Arc::new(
            FileEventStore::open(path)
                .await
                .with_context(|| format!("failed to open event store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryEventStore::new()),
    };
    let engine = build_engine(samples_dir, now_ms, tuning, events).await?;

    let mut results: Vec<EvaluationResult> = Vec::with_capacity(pairs.len());
    for key in &pairs {
        let result = engine
            .evaluate(key.metric, key.window)
            .await
            .with_context(|| format!("evaluation of {} failed", key))?;
        results.push(result);
    }

    let rows: Vec<ResultRow> = results
        .iter()
        .map(|r| ResultRow {
            metric: r.metric.to_string(),
            window: r.window.to_string(),
            status: color_status(r.status),
            fused: format_score(r.fused),
            threshold: format_score(r.threshold),
            severity: r
                .event
                .as_ref()
                .map(|e| color_severity(e.severity))
                .unwrap_or_else(|| "-".to_string()),
            event: r
                .event
                .as_ref()
                .map(|e| e.id.clone())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_rows(rows, &results, format)?;

    if let OutputFormat::Table = format {
        for event in results.iter().filter_map(|r| r.event.as_ref()) {
            println!();
            println!("{}", event.insight.title.bold());
            println!("{}", event.insight.description);
        }
        let fired = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Fired)
            .count();
        println!();
        match &events_path {
            Some(path) if fired > 0 => {
                print_info(&format!("{} events written to {}", fired, path.display()))
            }
            None if fired > 0 => print_info("Dry run: no events were written"),
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_reject_bad_sensitivity() {
        let flags = TuningFlags {
            sensitivity: Some(7),
            ..Default::default()
        };
        assert!(flags
            .config_for(Metric::Errors, Window::FiveMinutes, 0)
            .is_err());
    }

    #[test]
    fn test_flags_normalize_weights() {
        let flags = TuningFlags {
            weights: Some(vec![2.0, 2.0]),
            min_support: Some(4),
            ..Default::default()
        };
        let config = flags
            .config_for(Metric::Calls, Window::FifteenMinutes, 10)
            .unwrap();
        assert_eq!(config.fusion_weights, [0.5, 0.5]);
        assert_eq!(config.min_support, 4);
        assert_eq!(config.updated_at, 10);
    }
}
