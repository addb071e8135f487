//! Anomaly detection engine for service telemetry
//!
//! This crate provides the core functionality for:
//! - Bucketing raw samples into one-minute time series
//! - Z-score and EWMA deviation scoring with weighted fusion
//! - Severity classification and operator insights
//! - Tuning and anomaly event persistence
//! - Periodic scheduling, health checks and observability

pub mod anomaly;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod timeseries;
pub mod tuning;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{analyze, Analysis, AnomalyEngine, EngineConfig, Pipeline};
pub use error::{EngineError, Result};
pub use events::{AckOutcome, AnomalyEventStore, EventFilter, FileEventStore, InMemoryEventStore};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use scheduler::{BatchSummary, EvaluationScheduler, PairOutcome, SchedulerConfig};
pub use timeseries::{FileSampleSource, InMemorySource, TimeSeriesBucketer, TimeSeriesSource};
pub use tuning::{
    InMemoryTuningStore, RawTuningConfig, TuningCache, TuningConfig, TuningConfigStore,
};
