//! Anomaly Agent - scheduled anomaly detection over service telemetry
//!
//! Periodically buckets error, call and latency samples, scores the latest
//! minute of every (metric, window) pair and records fired anomalies.

use anomaly_lib::{
    cross_product,
    engine::EngineConfig,
    health::{components, HealthRegistry},
    observability::{EngineMetrics, StructuredLogger},
    scheduler::{EvaluationScheduler, SchedulerConfig},
    tuning::TuningCache,
    AnomalyEngine, EvaluationStatus, FileEventStore, FileSampleSource, InMemoryTuningStore,
    TuningConfigStore,
};
use anomaly_agent::{api, config};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting anomaly-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        samples_dir = %config.samples_dir.display(),
        events_path = %config.events_path.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DATA_SOURCE).await;
    health_registry.register(components::EVENT_STORE).await;
    health_registry.register(components::TUNING_STORE).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = EngineMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    // Bootstrap defaults for every pair, then apply operator overrides
    let tuning_store = Arc::new(InMemoryTuningStore::with_defaults(
        &config.metrics,
        &config.windows,
    ));
    if let Some(path) = &config.tuning_path {
        let now = chrono::Utc::now().timestamp_millis();
        let overrides = config::load_tuning_overrides(path, now, &metrics)?;
        tuning_store.put(overrides).await?;
    }
    let tuning = Arc::new(
        TuningCache::new(tuning_store, Arc::new(anomaly_lib::SystemClock))
            .with_ttl(config.tuning_cache_ttl()),
    );

    let events = FileEventStore::open(&config.events_path)
        .await
        .with_context(|| format!("failed to open event store {}", config.events_path.display()))?;
    let source = FileSampleSource::new(&config.samples_dir);

    let engine = Arc::new(
        AnomalyEngine::new(Arc::new(source), tuning, Arc::new(events))
            .with_config(EngineConfig {
                source_timeout: config.source_timeout(),
                store_timeout: config.store_timeout(),
            })
            .with_logger(logger.clone()),
    );

    let pairs = cross_product(&config.metrics, &config.windows);
    logger.log_startup(AGENT_VERSION, pairs.len());

    let scheduler_config = SchedulerConfig {
        interval: config.evaluation_interval(),
        max_concurrency: config.max_concurrency,
        ..SchedulerConfig::new(pairs)
    };
    let (scheduler, mut outcomes) = EvaluationScheduler::new(engine.clone(), scheduler_config);
    let scheduler = Arc::new(scheduler.with_health(health_registry.clone()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Drain per-pair outcomes so the channel never fills
    let outcome_handle = tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            match &outcome.result {
                Ok(result) if result.status == EvaluationStatus::Fired => {
                    debug!(
                        key = %outcome.key,
                        duration_us = outcome.duration_us,
                        "Pair fired"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %outcome.key, error = %e, "Pair evaluation failed");
                }
            }
        }
    });

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), engine));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("API server failed: {e}"),
                Err(e) => format!("API server task panicked: {e}"),
            };
            logger.log_shutdown(&reason);
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    outcome_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
