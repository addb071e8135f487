//! In-memory tuning store

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{bootstrap_defaults, TuningConfig, TuningConfigStore};
use crate::error::Result;
use crate::models::{Metric, TuningKey, Window};

/// Tuning store keyed by `"{metric}_{window}"`
#[derive(Debug, Default)]
pub struct InMemoryTuningStore {
    configs: DashMap<TuningKey, TuningConfig>,
    reads: AtomicUsize,
}

impl InMemoryTuningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with defaults for every (metric, window) pair
    pub fn with_defaults(metrics: &[Metric], windows: &[Window]) -> Self {
        let store = Self::new();
        for config in bootstrap_defaults(metrics, windows) {
            store.configs.insert(config.key(), config);
        }
        store
    }

    /// Number of `get` calls served, for cache verification
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[async_trait]
impl TuningConfigStore for InMemoryTuningStore {
    async fn get(&self, key: TuningKey) -> Result<Option<TuningConfig>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.configs.get(&key).map(|c| c.value().clone()))
    }

    async fn put(&self, configs: Vec<TuningConfig>) -> Result<()> {
        for config in configs {
            self.configs.insert(config.key(), config);
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<TuningConfig>> {
        let mut configs: Vec<TuningConfig> = self.configs.iter().map(|c| c.value().clone()).collect();
        configs.sort_by_key(|c| c.key());
        Ok(configs)
    }
}
