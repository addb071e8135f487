//! Per (metric, window) tuning
//!
//! Sensitivity, fusion weights and minimum support for every evaluation pair,
//! stored behind [`TuningConfigStore`] and read through [`TuningCache`].

mod cache;
mod config;
mod store;

pub use cache::{TuningCache, DEFAULT_TUNING_TTL};
pub use config::{
    bootstrap_defaults, normalize_weights, RawTuningConfig, TuningConfig, TuningConfigBuilder,
    TuningFallback, DEFAULT_MIN_SUPPORT, DEFAULT_SENSITIVITY, MAX_SENSITIVITY, MIN_MIN_SUPPORT,
    MIN_SENSITIVITY,
};
pub use store::InMemoryTuningStore;

use crate::error::Result;
use crate::models::TuningKey;
use async_trait::async_trait;

/// Trait for tuning persistence
#[async_trait]
pub trait TuningConfigStore: Send + Sync {
    /// Stored config for `key`, if any
    async fn get(&self, key: TuningKey) -> Result<Option<TuningConfig>>;

    /// Bulk upsert keyed by `"{metric}_{window}"`
    async fn put(&self, configs: Vec<TuningConfig>) -> Result<()>;

    /// Every stored config, ordered by key
    async fn all(&self) -> Result<Vec<TuningConfig>>;
}
