//! Agent configuration

use anomaly_lib::{
    observability::EngineMetrics,
    tuning::{RawTuningConfig, TuningConfig},
    Metric, Window,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Optional config file, overridden by `ANOMALY_*` environment variables
const CONFIG_FILE: &str = "/etc/anomaly-agent/config";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,

    #[serde(default = "default_windows")]
    pub windows: Vec<Window>,

    /// Directory holding `<metric>.jsonl` sample files
    #[serde(default = "default_samples_dir")]
    pub samples_dir: PathBuf,

    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,

    /// JSON array of tuning overrides applied over the bootstrap defaults
    #[serde(default)]
    pub tuning_path: Option<PathBuf>,

    #[serde(default = "default_tuning_cache_ttl")]
    pub tuning_cache_ttl_secs: u64,

    #[serde(default = "default_timeout_ms")]
    pub source_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_evaluation_interval() -> u64 {
    300
}

fn default_metrics() -> Vec<Metric> {
    Metric::ALL.to_vec()
}

fn default_windows() -> Vec<Window> {
    Window::ALL.to_vec()
}

fn default_samples_dir() -> PathBuf {
    PathBuf::from("/var/lib/anomaly-agent/samples")
}

fn default_events_path() -> PathBuf {
    PathBuf::from("/var/lib/anomaly-agent/events.json")
}

fn default_tuning_cache_ttl() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrency() -> usize {
    8
}

impl AgentConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix("ANOMALY")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("metrics")
                    .with_list_parse_key("windows"),
            )
            .build()
            .context("failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("invalid agent configuration")
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn tuning_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tuning_cache_ttl_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Read tuning overrides, defaulting malformed fields
///
/// Unknown metric or window names fail the load; bad values inside a known
/// pair only fall back to defaults.
pub fn load_tuning_overrides(
    path: &Path,
    updated_at_ms: i64,
    metrics: &EngineMetrics,
) -> Result<Vec<TuningConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tuning file {}", path.display()))?;
    let raw: Vec<RawTuningConfig> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse tuning file {}", path.display()))?;

    let mut configs = Vec::with_capacity(raw.len());
    for entry in raw {
        let label = format!("{}_{}", entry.metric, entry.window);
        let builder = entry
            .into_builder()
            .with_context(|| format!("invalid tuning entry {}", label))?;
        let (config, fallbacks) = builder.updated_at(updated_at_ms).resolve();
        for fb in &fallbacks {
            warn!(
                key = %fb.key,
                field = fb.field,
                reason = %fb.reason,
                "Invalid tuning value, using default"
            );
        }
        metrics.inc_tuning_fallbacks(fallbacks.len() as u64);
        configs.push(config);
    }

    info!(path = %path.display(), overrides = configs.len(), "Loaded tuning overrides");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_fall_back_per_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tuning.json");
        std::fs::write(
            &path,
            r#"[
                {"metric": "errors", "window": "5m", "sensitivity": 9, "minSupport": 4},
                {"metric": "latency_p95", "window": "15m", "fusionWeights": [3, 1]}
            ]"#,
        )
        .unwrap();

        let configs = load_tuning_overrides(&path, 42, &EngineMetrics::new()).unwrap();

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].sensitivity, 3);
        assert_eq!(configs[0].min_support, 4);
        assert_eq!(configs[0].updated_at, 42);
        assert_eq!(configs[1].fusion_weights, [0.75, 0.25]);
    }

    #[test]
    fn test_overrides_reject_unknown_metric() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tuning.json");
        std::fs::write(&path, r#"[{"metric": "cpu", "window": "5m"}]"#).unwrap();

        let err = load_tuning_overrides(&path, 0, &EngineMetrics::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown metric"));
    }
}
