//! End-to-end evaluation of one (metric, window) pair
//!
//! A run moves through `COLLECTING -> EVALUATING` and ends in exactly one of
//! `skipped`, `not_fired` or `fired`. Only `fired` writes, and it writes one
//! event. A failed run leaves nothing behind and is simply retried on the
//! next scheduler tick.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anomaly::{
    split_latest, DetectorOutput, EwmaDetector, FusionOutcome, FusionScorer, InsightGenerator,
    SeverityClassifier, ZScoreDetector, FUSION_REASON,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, Result};
use crate::events::{AckOutcome, AnomalyEventStore, EventFilter};
use crate::models::{
    AnomalyEvent, DataPoint, EvaluationResult, EvaluationStatus, Metric, Severity, TuningKey,
    Window,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::timeseries::{TimeSeriesBucketer, TimeSeriesSource};
use crate::tuning::{TuningCache, TuningConfig};

pub const OP_FETCH_SAMPLES: &str = "fetch_raw_samples";
pub const OP_APPEND_EVENT: &str = "append_event";
pub const OP_ACKNOWLEDGE: &str = "acknowledge";
pub const OP_LIST_EVENTS: &str = "list_events";

/// Default bound on the time-series read
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on event store calls
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts for the two blocking calls of a run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub source_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Detector outputs and decision for one bucket sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub status: EvaluationStatus,
    pub buckets: usize,
    pub zscore: Option<DetectorOutput>,
    pub ewma: Option<DetectorOutput>,
    pub fusion: Option<FusionOutcome>,
    pub severity: Option<Severity>,
}

impl Analysis {
    fn skipped(buckets: usize) -> Self {
        Self {
            status: EvaluationStatus::Skipped,
            buckets,
            zscore: None,
            ewma: None,
            fusion: None,
            severity: None,
        }
    }
}

/// The pure detection pipeline: detectors, fusion and severity
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub zscore: ZScoreDetector,
    pub ewma: EwmaDetector,
    pub fusion: FusionScorer,
}

impl Pipeline {
    pub fn analyze(&self, points: &[DataPoint], config: &TuningConfig) -> Analysis {
        if points.len() < config.min_support {
            return Analysis::skipped(points.len());
        }
        let (history, latest) = match split_latest(points) {
            Some(split) => split,
            None => return Analysis::skipped(0),
        };

        let z = self.zscore.detect(history, latest, config.min_support);
        let e = self.ewma.detect(history, latest, config.min_support);
        let fusion = self.fusion.fuse(&z, &e, config);

        let (status, severity) = if !fusion.sufficient_data {
            (EvaluationStatus::Skipped, None)
        } else if fusion.fired {
            (
                EvaluationStatus::Fired,
                Some(SeverityClassifier::classify(fusion.fused, fusion.threshold)),
            )
        } else {
            (EvaluationStatus::NotFired, None)
        };

        Analysis {
            status,
            buckets: points.len(),
            zscore: Some(z),
            ewma: Some(e),
            fusion: Some(fusion),
            severity,
        }
    }
}

/// Run the default pipeline over `points`
pub fn analyze(points: &[DataPoint], config: &TuningConfig) -> Analysis {
    Pipeline::default().analyze(points, config)
}

/// Bound `fut` by `limit`, mapping expiry to [`EngineError::Timeout`]
pub(crate) async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EngineError::Timeout {
            operation,
            after_ms: limit.as_millis() as u64,
        })?
}

/// Stateless evaluator wired to its collaborators
pub struct AnomalyEngine {
    source: Arc<dyn TimeSeriesSource>,
    tuning: Arc<TuningCache>,
    events: Arc<dyn AnomalyEventStore>,
    clock: Arc<dyn Clock>,
    bucketer: TimeSeriesBucketer,
    pipeline: Pipeline,
    config: EngineConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl AnomalyEngine {
    pub fn new(
        source: Arc<dyn TimeSeriesSource>,
        tuning: Arc<TuningCache>,
        events: Arc<dyn AnomalyEventStore>,
    ) -> Self {
        Self {
            source,
            tuning,
            events,
            clock: Arc::new(SystemClock),
            bucketer: TimeSeriesBucketer::new(),
            pipeline: Pipeline::default(),
            config: EngineConfig::default(),
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn tuning(&self) -> &TuningCache {
        &self.tuning
    }

    /// Current buckets for a pair, without evaluating or writing
    pub async fn preview_buckets(&self, metric: Metric, window: Window) -> Result<Vec<DataPoint>> {
        let now = self.clock.now_ms();
        self.collect(metric, window, now).await
    }

    /// Evaluate the latest bucket of a pair
    pub async fn evaluate(&self, metric: Metric, window: Window) -> Result<EvaluationResult> {
        let start = Instant::now();
        let result = self.run(metric, window).await;
        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());

        match &result {
            Ok(r) => self.metrics.inc_evaluation(r.status),
            Err(e) => {
                if e.is_source_failure() {
                    self.metrics.inc_source_errors();
                } else if e.is_persistence_failure() {
                    self.metrics.inc_persistence_errors();
                }
                self.logger.log_failure(metric, window, &e.to_string());
            }
        }
        result
    }

    /// Acknowledge an event; repeating the call is a no-op
    pub async fn acknowledge(&self, id: &str) -> Result<AckOutcome> {
        let at = self.clock.now_ms();
        let outcome = bounded(
            OP_ACKNOWLEDGE,
            self.config.store_timeout,
            self.events.acknowledge(id, at),
        )
        .await?;
        self.logger.log_acknowledged(
            id,
            outcome.acknowledged_at(),
            matches!(outcome, AckOutcome::Acknowledged { .. }),
        );
        Ok(outcome)
    }

    pub async fn list_events(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AnomalyEvent>> {
        bounded(
            OP_LIST_EVENTS,
            self.config.store_timeout,
            self.events.list(filter, limit),
        )
        .await
    }

    async fn collect(&self, metric: Metric, window: Window, now: i64) -> Result<Vec<DataPoint>> {
        let since = TimeSeriesBucketer::window_start_ms(window, now);
        let samples = bounded(
            OP_FETCH_SAMPLES,
            self.config.source_timeout,
            self.source.fetch_raw_samples(metric, since),
        )
        .await?;
        Ok(self
            .bucketer
            .bucket(window, metric.aggregation(), &samples, now))
    }

    async fn run(&self, metric: Metric, window: Window) -> Result<EvaluationResult> {
        let key = TuningKey::new(metric, window);
        let now = self.clock.now_ms();

        debug!(key = %key, phase = "collecting", "Evaluation run started");
        let config = self.tuning.get(key).await;
        let points = self.collect(metric, window, now).await?;

        debug!(key = %key, phase = "evaluating", buckets = points.len(), "Buckets collected");
        let analysis = self.pipeline.analyze(&points, &config);

        let mut result = EvaluationResult {
            metric,
            window,
            status: analysis.status,
            fused: analysis.fusion.map(|f| f.fused),
            threshold: analysis.fusion.map(|f| f.threshold),
            event: None,
        };

        let (fusion, severity) = match (analysis.status, analysis.fusion, analysis.severity) {
            (EvaluationStatus::Fired, Some(fusion), Some(severity)) => (fusion, severity),
            (EvaluationStatus::NotFired, Some(fusion), _) => {
                self.logger
                    .log_not_fired(metric, window, fusion.fused, fusion.threshold);
                return Ok(result);
            }
            _ => {
                self.logger
                    .log_skipped(metric, window, analysis.buckets, config.min_support);
                result.status = EvaluationStatus::Skipped;
                return Ok(result);
            }
        };

        let mut event = AnomalyEvent {
            id: uuid::Uuid::new_v4().to_string(),
            ts: now,
            metric,
            window,
            score: fusion.fused,
            severity,
            reason: FUSION_REASON.to_string(),
            insight: InsightGenerator::generate(metric, severity, fusion.fused, window),
            acknowledged: false,
            acknowledged_at: None,
        };

        let appended = bounded(
            OP_APPEND_EVENT,
            self.config.store_timeout,
            self.events.append(event.clone()),
        )
        .await;
        match appended {
            // The store may assign its own id
            Ok(id) => event.id = id,
            Err(e) => {
                self.logger.log_unpersisted(&event, &e.to_string());
                return Err(match e {
                    EngineError::Timeout { .. } | EngineError::PersistenceFailure(_) => e,
                    other => EngineError::PersistenceFailure(other.to_string()),
                });
            }
        }

        self.metrics.inc_anomaly(severity);
        self.logger.log_anomaly(&event, fusion.threshold);
        result.event = Some(event);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::tests::points;
    use crate::clock::ManualClock;
    use crate::events::InMemoryEventStore;
    use crate::models::{RawSample, BUCKET_MS};
    use crate::timeseries::InMemorySource;
    use crate::tuning::InMemoryTuningStore;
    use async_trait::async_trait;

    // 2024-01-01T00:20:30Z
    const NOW: i64 = 1_704_068_430_000;

    fn default_config() -> TuningConfig {
        TuningConfig::defaults(Metric::Errors, Window::FifteenMinutes)
    }

    /// One sample per bucket carrying the bucket's value
    fn samples_for(values: &[f64], window: Window) -> Vec<RawSample> {
        let start = TimeSeriesBucketer::window_start_ms(window, NOW);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawSample::new(start + i as i64 * BUCKET_MS, *v))
            .collect()
    }

    struct Harness {
        engine: AnomalyEngine,
        source: Arc<InMemorySource>,
        events: Arc<InMemoryEventStore>,
        tuning: Arc<TuningCache>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(source: Arc<dyn TimeSeriesSource>, config: EngineConfig) -> (AnomalyEngine, Arc<InMemoryEventStore>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(InMemoryTuningStore::with_defaults(&Metric::ALL, &Window::ALL));
        let tuning = Arc::new(TuningCache::new(store, clock.clone()));
        let events = Arc::new(InMemoryEventStore::new());
        let engine = AnomalyEngine::new(source, tuning, events.clone())
            .with_clock(clock)
            .with_config(config);
        (engine, events)
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let source = Arc::new(InMemorySource::new());
        let store = Arc::new(InMemoryTuningStore::with_defaults(&Metric::ALL, &Window::ALL));
        let tuning = Arc::new(TuningCache::new(store, clock.clone()));
        let events = Arc::new(InMemoryEventStore::new());
        let engine = AnomalyEngine::new(source.clone(), tuning.clone(), events.clone())
            .with_clock(clock.clone());
        Harness {
            engine,
            source,
            events,
            tuning,
            clock,
        }
    }

    #[test]
    fn test_spike_scenario_fires() {
        let series = points(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 50.0]);
        let analysis = analyze(&series, &default_config());

        assert_eq!(analysis.status, EvaluationStatus::Fired);
        assert!(analysis.severity.unwrap() >= Severity::Medium);
    }

    #[test]
    fn test_stable_scenario_does_not_fire() {
        let series = points(&[5.0, 6.0, 5.0, 7.0, 6.0, 5.0, 6.0, 7.0]);
        let analysis = analyze(&series, &default_config());

        assert_eq!(analysis.status, EvaluationStatus::NotFired);
        assert!(analysis.severity.is_none());
        let fusion = analysis.fusion.unwrap();
        assert!(fusion.fused < fusion.threshold);
    }

    #[test]
    fn test_short_series_is_skipped() {
        let series = points(&[1.0, 2.0, 3.0, 4.0, 50.0]);
        let analysis = analyze(&series, &default_config());

        assert_eq!(analysis.status, EvaluationStatus::Skipped);
        assert!(analysis.fusion.is_none());
        assert_eq!(analysis.buckets, 5);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let series = points(&[3.0, 9.0, 4.0, 4.0, 12.0, 1.0, 0.0, 7.0, 30.0]);
        let a = analyze(&series, &default_config());
        let b = analyze(&series, &default_config());

        assert_eq!(a, b);
        assert_eq!(
            a.fusion.unwrap().fused.to_bits(),
            b.fusion.unwrap().fused.to_bits()
        );
    }

    #[test]
    fn test_higher_sensitivity_number_fires_less() {
        let series = points(&[5.0, 6.0, 5.0, 7.0, 6.0, 5.0, 6.0, 7.0]);
        let mut fired_at = Vec::new();
        for s in 1..=5 {
            let config = TuningConfig::builder(Metric::Errors, Window::FifteenMinutes)
                .sensitivity(s)
                .build();
            fired_at.push(analyze(&series, &config).status == EvaluationStatus::Fired);
        }
        // Once a level stops firing, no less sensitive level fires
        for pair in fired_at.windows(2) {
            assert!(pair[0] || !pair[1]);
        }
        assert!(fired_at[0], "most sensitive setting should flag the stable tail");
    }

    #[tokio::test]
    async fn test_evaluate_spike_writes_one_event() {
        let h = harness();
        let mut values = vec![0.0; 14];
        values.push(50.0);
        h.source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;

        let result = h
            .engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap();

        assert_eq!(result.status, EvaluationStatus::Fired);
        let event = result.event.unwrap();
        assert!(event.severity >= Severity::Medium);
        assert_eq!(event.ts, NOW);
        assert_eq!(event.reason, FUSION_REASON);
        assert_eq!(event.insight.title, "errors anomaly detected (15m)");
        assert!(!event.acknowledged);

        assert_eq!(h.events.len().await, 1);
        assert_eq!(h.events.get(&event.id).await.unwrap().unwrap(), event);
    }

    #[tokio::test]
    async fn test_evaluate_flat_series_not_fired() {
        let h = harness();
        h.source
            .extend(Metric::Calls, samples_for(&[5.0; 15], Window::FifteenMinutes))
            .await;

        let result = h
            .engine
            .evaluate(Metric::Calls, Window::FifteenMinutes)
            .await
            .unwrap();

        assert_eq!(result.status, EvaluationStatus::NotFired);
        assert_eq!(result.fused, Some(0.0));
        assert!(result.event.is_none());
        assert!(h.events.is_empty().await);
    }

    #[tokio::test]
    async fn test_five_buckets_with_default_support_skipped() {
        let h = harness();
        h.source
            .extend(
                Metric::Errors,
                samples_for(&[0.0, 0.0, 0.0, 0.0, 99.0], Window::FiveMinutes),
            )
            .await;

        let result = h
            .engine
            .evaluate(Metric::Errors, Window::FiveMinutes)
            .await
            .unwrap();

        assert_eq!(result.status, EvaluationStatus::Skipped);
        assert!(result.fused.is_none());
        assert!(h.events.is_empty().await);
    }

    #[tokio::test]
    async fn test_insufficient_data_never_writes() {
        let h = harness();
        let mut values = vec![0.0; 14];
        values.push(1_000.0);
        h.source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;

        for window in Window::ALL {
            for min_support in (window.bucket_count() + 1)..=20 {
                h.tuning
                    .put(vec![TuningConfig::builder(Metric::Errors, window)
                        .min_support(min_support as i64)
                        .build()])
                    .await
                    .unwrap();
                let result = h.engine.evaluate(Metric::Errors, window).await.unwrap();
                assert_eq!(result.status, EvaluationStatus::Skipped);
            }
        }
        assert!(h.events.is_empty().await);
    }

    #[tokio::test]
    async fn test_lower_min_support_enables_short_window() {
        let h = harness();
        h.source
            .extend(
                Metric::Errors,
                samples_for(&[0.0, 0.0, 0.0, 0.0, 40.0], Window::FiveMinutes),
            )
            .await;
        h.tuning
            .put(vec![TuningConfig::builder(Metric::Errors, Window::FiveMinutes)
                .min_support(5)
                .build()])
            .await
            .unwrap();

        let result = h
            .engine
            .evaluate(Metric::Errors, Window::FiveMinutes)
            .await
            .unwrap();
        assert_eq!(result.status, EvaluationStatus::Fired);
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let h = harness();
        let mut values = vec![0.0; 14];
        values.push(50.0);
        h.source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;

        let first = h
            .engine
            .preview_buckets(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap();
        let second = h
            .engine
            .preview_buckets(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap();

        assert_eq!(first.len(), 15);
        assert_eq!(first, second);
        assert_eq!(first.last().unwrap().value, 50.0);
        assert!(h.events.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_evaluation_identical_scores() {
        let h = harness();
        let values: Vec<f64> = (0..15).map(|i| ((i * 7) % 5) as f64).collect();
        h.source
            .extend(Metric::Calls, samples_for(&values, Window::FifteenMinutes))
            .await;

        let a = h.engine.evaluate(Metric::Calls, Window::FifteenMinutes).await.unwrap();
        let b = h.engine.evaluate(Metric::Calls, Window::FifteenMinutes).await.unwrap();

        assert_eq!(a.status, b.status);
        assert_eq!(a.fused.map(f64::to_bits), b.fused.map(f64::to_bits));
    }

    #[tokio::test]
    async fn test_acknowledge_twice_is_noop() {
        let h = harness();
        let mut values = vec![0.0; 14];
        values.push(50.0);
        h.source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;
        let event = h
            .engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap()
            .event
            .unwrap();

        h.clock.advance_ms(1_000);
        let first = h.engine.acknowledge(&event.id).await.unwrap();
        h.clock.advance_ms(1_000);
        let second = h.engine.acknowledge(&event.id).await.unwrap();

        assert_eq!(first, AckOutcome::Acknowledged { at: NOW + 1_000 });
        assert_eq!(second, AckOutcome::AlreadyAcknowledged { at: NOW + 1_000 });

        let listed = h
            .engine
            .list_events(
                &EventFilter {
                    acknowledged: Some(true),
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].acknowledged_at, Some(NOW + 1_000));
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id() {
        let h = harness();
        let err = h.engine.acknowledge("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::EventNotFound(_)));
    }

    struct DownSource;

    #[async_trait]
    impl TimeSeriesSource for DownSource {
        async fn fetch_raw_samples(&self, _metric: Metric, _since_ms: i64) -> Result<Vec<RawSample>> {
            Err(EngineError::DataSourceUnavailable("connection refused".into()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl TimeSeriesSource for SlowSource {
        async fn fetch_raw_samples(&self, _metric: Metric, _since_ms: i64) -> Result<Vec<RawSample>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_source_failure_is_error_without_write() {
        let (engine, events) = harness_with(Arc::new(DownSource), EngineConfig::default());

        let err = engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DataSourceUnavailable(_)));
        assert!(err.is_source_failure());
        assert!(events.is_empty().await);
    }

    #[tokio::test]
    async fn test_source_timeout() {
        let config = EngineConfig {
            source_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (engine, _events) = harness_with(Arc::new(SlowSource), config);

        let err = engine
            .preview_buckets(Metric::Calls, Window::FiveMinutes)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Timeout {
                operation: OP_FETCH_SAMPLES,
                after_ms: 20
            }
        ));
    }

    struct RejectingStore;

    #[async_trait]
    impl AnomalyEventStore for RejectingStore {
        async fn append(&self, _event: AnomalyEvent) -> Result<String> {
            Err(EngineError::PersistenceFailure("disk full".into()))
        }

        async fn get(&self, _id: &str) -> Result<Option<AnomalyEvent>> {
            Ok(None)
        }

        async fn list(&self, _filter: &EventFilter, _limit: usize) -> Result<Vec<AnomalyEvent>> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, id: &str, _at_ms: i64) -> Result<AckOutcome> {
            Err(EngineError::EventNotFound(id.to_string()))
        }
    }

    /// Keeps events in memory under ids of its own choosing
    #[derive(Default)]
    struct RenumberingStore {
        inner: InMemoryEventStore,
        next: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl AnomalyEventStore for RenumberingStore {
        async fn append(&self, mut event: AnomalyEvent) -> Result<String> {
            let n = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            event.id = format!("evt-{}", n);
            self.inner.append(event).await
        }

        async fn get(&self, id: &str) -> Result<Option<AnomalyEvent>> {
            self.inner.get(id).await
        }

        async fn list(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AnomalyEvent>> {
            self.inner.list(filter, limit).await
        }

        async fn acknowledge(&self, id: &str, at_ms: i64) -> Result<AckOutcome> {
            self.inner.acknowledge(id, at_ms).await
        }
    }

    async fn spike_engine(events: Arc<dyn AnomalyEventStore>, config: EngineConfig) -> AnomalyEngine {
        let clock = Arc::new(ManualClock::new(NOW));
        let source = Arc::new(InMemorySource::new());
        let mut values = vec![0.0; 14];
        values.push(50.0);
        source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;
        let tuning = Arc::new(TuningCache::new(
            Arc::new(InMemoryTuningStore::new()),
            clock.clone(),
        ));
        AnomalyEngine::new(source, tuning, events)
            .with_clock(clock)
            .with_config(config)
    }

    #[tokio::test]
    async fn test_result_carries_store_assigned_id() {
        let engine = spike_engine(Arc::new(RenumberingStore::default()), EngineConfig::default()).await;

        let event = engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap()
            .event
            .unwrap();

        assert_eq!(event.id, "evt-0");
        assert_eq!(
            engine.acknowledge(&event.id).await.unwrap(),
            AckOutcome::Acknowledged { at: NOW }
        );
    }

    #[tokio::test]
    async fn test_custom_pipeline_caps_flat_history_score() {
        let capped = Pipeline {
            zscore: ZScoreDetector::new().with_flat_sentinel(2.0),
            ..Default::default()
        };
        let engine = spike_engine(Arc::new(InMemoryEventStore::new()), EngineConfig::default())
            .await
            .with_pipeline(capped);
        let default_engine =
            spike_engine(Arc::new(InMemoryEventStore::new()), EngineConfig::default()).await;

        let capped_result = engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap();
        let default_result = default_engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap();

        // z saturates at half scale, EWMA still saturates
        assert!((capped_result.fused.unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(default_result.fused, Some(1.0));
        assert_eq!(capped_result.status, EvaluationStatus::Fired);
    }

    #[tokio::test]
    async fn test_timed_out_write_leaves_no_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(
            crate::events::FileEventStore::open(dir.path().join("events.json"))
                .await
                .unwrap(),
        );
        let config = EngineConfig {
            store_timeout: Duration::from_nanos(1),
            ..Default::default()
        };
        let engine = spike_engine(store.clone(), config).await;

        let result = engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await;
        let stored = store.list(&EventFilter::default(), 100).await.unwrap();
        match result {
            Err(e) => {
                assert!(matches!(e, EngineError::Timeout { operation: OP_APPEND_EVENT, .. }));
                assert!(stored.is_empty());
            }
            Ok(r) => {
                assert_eq!(stored.len(), 1);
                assert_eq!(stored[0].id, r.event.unwrap().id);
            }
        }

        // A retry with room to finish writes exactly one event
        let retry = spike_engine(store.clone(), EngineConfig::default()).await;
        if stored.is_empty() {
            retry
                .evaluate(Metric::Errors, Window::FifteenMinutes)
                .await
                .unwrap();
        }
        assert_eq!(store.list(&EventFilter::default(), 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_reported() {
        let clock = Arc::new(ManualClock::new(NOW));
        let source = Arc::new(InMemorySource::new());
        let mut values = vec![0.0; 14];
        values.push(50.0);
        source
            .extend(Metric::Errors, samples_for(&values, Window::FifteenMinutes))
            .await;
        let tuning = Arc::new(TuningCache::new(
            Arc::new(InMemoryTuningStore::new()),
            clock.clone(),
        ));
        let engine = AnomalyEngine::new(source, tuning, Arc::new(RejectingStore)).with_clock(clock);

        let err = engine
            .evaluate(Metric::Errors, Window::FifteenMinutes)
            .await
            .unwrap_err();
        assert!(err.is_persistence_failure());
    }
}
