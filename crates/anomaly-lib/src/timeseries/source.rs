//! Time-series source implementations

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::TimeSeriesSource;
use crate::error::{EngineError, Result};
use crate::models::{Metric, RawSample};

/// In-memory source, used by tests and CLI dry runs
#[derive(Debug, Default)]
pub struct InMemorySource {
    samples: RwLock<HashMap<Metric, Vec<RawSample>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append samples for a metric, keeping them ordered by timestamp
    pub async fn extend(&self, metric: Metric, samples: impl IntoIterator<Item = RawSample>) {
        let mut all = self.samples.write().await;
        let series = all.entry(metric).or_default();
        series.extend(samples);
        series.sort_by_key(|s| s.timestamp_ms);
    }
}

#[async_trait]
impl TimeSeriesSource for InMemorySource {
    async fn fetch_raw_samples(&self, metric: Metric, since_ms: i64) -> Result<Vec<RawSample>> {
        let all = self.samples.read().await;
        Ok(all
            .get(&metric)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp_ms >= since_ms)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Reads `<dir>/<metric>.jsonl`, one [`RawSample`] object per line
///
/// A missing file means the metric has produced no samples yet. Unreadable
/// or malformed files surface as [`EngineError::DataSourceUnavailable`].
#[derive(Debug, Clone)]
pub struct FileSampleSource {
    dir: PathBuf,
}

impl FileSampleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, metric: Metric) -> PathBuf {
        self.dir.join(format!("{}.jsonl", metric))
    }
}

#[async_trait]
impl TimeSeriesSource for FileSampleSource {
    async fn fetch_raw_samples(&self, metric: Metric, since_ms: i64) -> Result<Vec<RawSample>> {
        let path = self.path_for(metric);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No samples file yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(EngineError::DataSourceUnavailable(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut samples = parse_samples(&content).map_err(|e| {
            EngineError::DataSourceUnavailable(format!("{}: {}", path.display(), e))
        })?;
        samples.retain(|s| s.timestamp_ms >= since_ms);
        samples.sort_by_key(|s| s.timestamp_ms);
        Ok(samples)
    }
}

/// Parse samples from either a JSON array or newline-delimited JSON objects
pub fn parse_samples(content: &str) -> std::result::Result<Vec<RawSample>, String> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<RawSample>(line).map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}
