//! Periodic evaluation loop
//!
//! Every tick evaluates all configured (metric, window) pairs concurrently.
//! A failing pair is reported and retried on the next tick; it never blocks
//! the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::engine::{bounded, AnomalyEngine};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::{EvaluationResult, EvaluationStatus, TuningKey};

/// Default interval between batches
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default cap on pairs evaluated at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Upper bound on a single run, on top of the engine's own call timeouts
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);

pub const OP_EVALUATE: &str = "evaluate";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub pairs: Vec<TuningKey>,
    pub max_concurrency: usize,
    pub run_timeout: Duration,
}

impl SchedulerConfig {
    pub fn new(pairs: Vec<TuningKey>) -> Self {
        Self {
            interval: DEFAULT_EVALUATION_INTERVAL,
            pairs,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Outcome of one pair within a batch
#[derive(Debug)]
pub struct PairOutcome {
    pub key: TuningKey,
    pub result: Result<EvaluationResult>,
    pub duration_us: u64,
}

/// Counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub fired: usize,
    pub not_fired: usize,
    pub skipped: usize,
    pub source_failures: usize,
    pub persistence_failures: usize,
    pub other_failures: usize,
}

impl BatchSummary {
    fn record(&mut self, result: &Result<EvaluationResult>) {
        match result {
            Ok(r) => match r.status {
                EvaluationStatus::Fired => self.fired += 1,
                EvaluationStatus::NotFired => self.not_fired += 1,
                EvaluationStatus::Skipped => self.skipped += 1,
            },
            Err(e) if e.is_source_failure() => self.source_failures += 1,
            Err(e) if e.is_persistence_failure() => self.persistence_failures += 1,
            Err(_) => self.other_failures += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.source_failures + self.persistence_failures + self.other_failures
    }

    pub fn total(&self) -> usize {
        self.fired + self.not_fired + self.skipped + self.failures()
    }
}

/// Runs the engine over every configured pair on a fixed interval
pub struct EvaluationScheduler {
    engine: Arc<AnomalyEngine>,
    config: SchedulerConfig,
    health: Option<HealthRegistry>,
    outcome_tx: mpsc::Sender<PairOutcome>,
}

impl EvaluationScheduler {
    pub fn new(
        engine: Arc<AnomalyEngine>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::Receiver<PairOutcome>) {
        let capacity = (config.pairs.len() * 4).max(100);
        let (tx, rx) = mpsc::channel(capacity);
        let scheduler = Self {
            engine,
            config,
            health: None,
            outcome_tx: tx,
        };
        (scheduler, rx)
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn pairs(&self) -> &[TuningKey] {
        &self.config.pairs
    }

    /// Run batches until `shutdown` fires
    ///
    /// A batch still running at shutdown is dropped, aborting its pending runs.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            pairs = self.config.pairs.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting evaluation scheduler"
        );
        if let Some(health) = &self.health {
            health.set_healthy(components::SCHEDULER).await;
        }

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        summary = self.run_once() => {
                            debug!(?summary, "Batch finished");
                        }
                        _ = shutdown.recv() => {
                            info!("Shutdown during batch, dropping in-flight runs");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down evaluation scheduler");
                    break;
                }
            }
        }
    }

    /// Evaluate every pair once and wait for all of them
    pub async fn run_once(&self) -> BatchSummary {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for key in self.config.pairs.iter().copied() {
            let engine = self.engine.clone();
            let semaphore = semaphore.clone();
            let run_timeout = self.config.run_timeout;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let started = Instant::now();
                let result = bounded(
                    OP_EVALUATE,
                    run_timeout,
                    engine.evaluate(key.metric, key.window),
                )
                .await;
                PairOutcome {
                    key,
                    result,
                    duration_us: started.elapsed().as_micros() as u64,
                }
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    summary.record(&outcome.result);
                    if let Err(e) = self.outcome_tx.try_send(outcome) {
                        debug!(error = %e, "Outcome channel full or closed, dropping outcome");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Evaluation task panicked");
                    summary.other_failures += 1;
                }
            }
        }

        self.update_health(&summary).await;

        if summary.failures() > 0 {
            warn!(
                failures = summary.failures(),
                source_failures = summary.source_failures,
                persistence_failures = summary.persistence_failures,
                "Batch completed with failures"
            );
        }
        info!(
            pairs = summary.total(),
            fired = summary.fired,
            not_fired = summary.not_fired,
            skipped = summary.skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Evaluation batch completed"
        );
        summary
    }

    async fn update_health(&self, summary: &BatchSummary) {
        let Some(health) = &self.health else {
            return;
        };

        if summary.source_failures > 0 {
            health
                .set_degraded(
                    components::DATA_SOURCE,
                    format!("{} runs failed to read samples", summary.source_failures),
                )
                .await;
        } else {
            health.set_healthy(components::DATA_SOURCE).await;
        }

        match self.engine.tuning().store_error().await {
            Some(e) => {
                health
                    .set_degraded(
                        components::TUNING_STORE,
                        format!("tuning read failed, defaults in use: {}", e),
                    )
                    .await
            }
            None => health.set_healthy(components::TUNING_STORE).await,
        }

        if summary.persistence_failures > 0 {
            health
                .set_degraded(
                    components::EVENT_STORE,
                    format!("{} events could not be written", summary.persistence_failures),
                )
                .await;
        } else {
            health.set_healthy(components::EVENT_STORE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::EngineError;
    use crate::events::InMemoryEventStore;
    use crate::health::ComponentStatus;
    use crate::models::{cross_product, Metric, RawSample, Window, BUCKET_MS};
    use crate::timeseries::{InMemorySource, TimeSeriesBucketer, TimeSeriesSource};
    use crate::tuning::{InMemoryTuningStore, TuningCache};
    use async_trait::async_trait;

    const NOW: i64 = 1_704_068_430_000;

    /// Serves errors from memory and fails every other metric
    struct PartialSource {
        inner: InMemorySource,
    }

    #[async_trait]
    impl TimeSeriesSource for PartialSource {
        async fn fetch_raw_samples(&self, metric: Metric, since_ms: i64) -> Result<Vec<RawSample>> {
            match metric {
                Metric::Errors => self.inner.fetch_raw_samples(metric, since_ms).await,
                _ => Err(EngineError::DataSourceUnavailable("backend down".into())),
            }
        }
    }

    async fn spike_source() -> InMemorySource {
        let source = InMemorySource::new();
        let start = TimeSeriesBucketer::window_start_ms(Window::FifteenMinutes, NOW);
        let samples = (0..15).map(|i| {
            let value = if i == 14 { 50.0 } else { 0.0 };
            RawSample::new(start + i * BUCKET_MS, value)
        });
        source.extend(Metric::Errors, samples).await;
        source
    }

    fn engine_over(source: Arc<dyn TimeSeriesSource>) -> (Arc<AnomalyEngine>, Arc<InMemoryEventStore>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let tuning = Arc::new(TuningCache::new(
            Arc::new(InMemoryTuningStore::with_defaults(&Metric::ALL, &Window::ALL)),
            clock.clone(),
        ));
        let events = Arc::new(InMemoryEventStore::new());
        let engine = AnomalyEngine::new(source, tuning, events.clone()).with_clock(clock);
        (Arc::new(engine), events)
    }

    #[tokio::test]
    async fn test_run_once_evaluates_every_pair() {
        let (engine, events) = engine_over(Arc::new(spike_source().await));
        let config = SchedulerConfig::new(cross_product(&Metric::ALL, &Window::ALL));
        let (scheduler, mut rx) = EvaluationScheduler::new(engine, config);

        let summary = scheduler.run_once().await;

        assert_eq!(summary.total(), 9);
        assert_eq!(summary.failures(), 0);
        assert_eq!(summary.fired, 1);
        assert_eq!(events.len().await, 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 9);
    }

    #[tokio::test]
    async fn test_failing_pairs_do_not_block_others() {
        let source = PartialSource {
            inner: spike_source().await,
        };
        let (engine, events) = engine_over(Arc::new(source));
        let mut config = SchedulerConfig::new(cross_product(&Metric::ALL, &Window::ALL));
        config.max_concurrency = 2;
        let health = HealthRegistry::new();
        let (scheduler, _rx) = EvaluationScheduler::new(engine, config);
        let scheduler = scheduler.with_health(health.clone());

        let summary = scheduler.run_once().await;

        assert_eq!(summary.source_failures, 6);
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.total(), 9);
        assert_eq!(events.len().await, 1);
        assert_eq!(
            health.status_of(components::DATA_SOURCE).await,
            Some(ComponentStatus::Degraded)
        );
        assert_eq!(
            health.status_of(components::EVENT_STORE).await,
            Some(ComponentStatus::Healthy)
        );
    }

    struct OfflineTuningStore;

    #[async_trait]
    impl crate::tuning::TuningConfigStore for OfflineTuningStore {
        async fn get(&self, _key: TuningKey) -> Result<Option<crate::tuning::TuningConfig>> {
            Err(EngineError::PersistenceFailure("tuning db offline".into()))
        }

        async fn put(&self, _configs: Vec<crate::tuning::TuningConfig>) -> Result<()> {
            Err(EngineError::PersistenceFailure("tuning db offline".into()))
        }

        async fn all(&self) -> Result<Vec<crate::tuning::TuningConfig>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_tuning_store_outage_degrades_health() {
        let clock = Arc::new(ManualClock::new(NOW));
        let tuning = Arc::new(TuningCache::new(Arc::new(OfflineTuningStore), clock.clone()));
        let events = Arc::new(InMemoryEventStore::new());
        let engine = AnomalyEngine::new(Arc::new(spike_source().await), tuning, events.clone())
            .with_clock(clock);
        let config = SchedulerConfig::new(cross_product(&[Metric::Errors], &[Window::FifteenMinutes]));
        let health = HealthRegistry::new();
        let (scheduler, _rx) = EvaluationScheduler::new(Arc::new(engine), config);
        let scheduler = scheduler.with_health(health.clone());

        let summary = scheduler.run_once().await;

        // Defaults still evaluate the pair
        assert_eq!(summary.fired, 1);
        assert_eq!(events.len().await, 1);
        assert_eq!(
            health.status_of(components::TUNING_STORE).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (engine, _events) = engine_over(Arc::new(InMemorySource::new()));
        let mut config = SchedulerConfig::new(cross_product(&[Metric::Calls], &Window::ALL));
        config.interval = Duration::from_millis(20);
        let (scheduler, mut rx) = EvaluationScheduler::new(engine, config);
        let scheduler = Arc::new(scheduler);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.key.metric, Metric::Calls);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
