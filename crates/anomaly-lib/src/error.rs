//! Error taxonomy for the anomaly engine

use thiserror::Error;

/// Errors surfaced by the engine and its collaborators.
///
/// "Insufficient data" is deliberately absent: it is a normal `skipped`
/// evaluation outcome, not a failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The time-series source could not be read. Transient; the pair is
    /// retried on the next scheduler tick.
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),

    /// A bounded call did not complete in time
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    /// Writing or updating an anomaly event failed
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Acknowledgment targeted an event id that does not exist
    #[error("anomaly event not found: {0}")]
    EventNotFound(String),

    /// Strict tuning validation rejected a value
    #[error("invalid tuning config: {0}")]
    InvalidTuningConfig(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown window: {0}")]
    UnknownWindow(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the failure came from reading the time-series source
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            EngineError::DataSourceUnavailable(_)
                | EngineError::Timeout {
                    operation: crate::engine::OP_FETCH_SAMPLES,
                    ..
                }
        )
    }

    /// Whether the failure came from writing to the event store
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            EngineError::PersistenceFailure(_)
                | EngineError::Timeout {
                    operation: crate::engine::OP_APPEND_EVENT,
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
