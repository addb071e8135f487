//! Read-through tuning cache with TTL
//!
//! Tuning is read on every evaluation but written rarely by operators. The
//! cache bounds store reads to one per key per TTL. Time comes from the
//! injected [`Clock`], so tests control expiry without sleeping.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{TuningConfig, TuningConfigStore};
use crate::clock::Clock;
use crate::error::Result;
use crate::models::TuningKey;
use crate::observability::EngineMetrics;

/// Default time a cached config stays fresh
pub const DEFAULT_TUNING_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedTuning {
    config: TuningConfig,
    fetched_at_ms: i64,
}

/// Read-through cache in front of a [`TuningConfigStore`]
pub struct TuningCache {
    store: Arc<dyn TuningConfigStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: DashMap<TuningKey, CachedTuning>,
    metrics: EngineMetrics,
    last_store_error: RwLock<Option<String>>,
}

impl TuningCache {
    pub fn new(store: Arc<dyn TuningConfigStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: DEFAULT_TUNING_TTL,
            entries: DashMap::new(),
            metrics: EngineMetrics::new(),
            last_store_error: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Config for `key`, never failing
    ///
    /// Absent keys resolve to defaults. Store errors also resolve to defaults,
    /// are counted as fallbacks and are not cached, so the next call retries
    /// the store.
    pub async fn get(&self, key: TuningKey) -> TuningConfig {
        let now = self.clock.now_ms();
        if let Some(entry) = self.entries.get(&key) {
            if now - entry.fetched_at_ms < self.ttl.as_millis() as i64 {
                return entry.config.clone();
            }
        }

        match self.store.get(key).await {
            Ok(found) => {
                if self.last_store_error.read().await.is_some() {
                    *self.last_store_error.write().await = None;
                }
                let config = found.unwrap_or_else(|| {
                    debug!(key = %key, "No tuning stored, using defaults");
                    TuningConfig::defaults(key.metric, key.window)
                });
                self.entries.insert(
                    key,
                    CachedTuning {
                        config: config.clone(),
                        fetched_at_ms: now,
                    },
                );
                config
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Tuning store read failed, using defaults");
                self.metrics.inc_tuning_fallbacks(1);
                *self.last_store_error.write().await = Some(e.to_string());
                TuningConfig::defaults(key.metric, key.window)
            }
        }
    }

    /// Write through to the store and drop the affected cache entries
    pub async fn put(&self, configs: Vec<TuningConfig>) -> Result<()> {
        let keys: Vec<TuningKey> = configs.iter().map(|c| c.key()).collect();
        self.store.put(configs).await?;
        for key in keys {
            self.invalidate(key);
        }
        Ok(())
    }

    /// Error of the most recent store read, cleared by the next successful one
    pub async fn store_error(&self) -> Option<String> {
        self.last_store_error.read().await.clone()
    }

    pub fn invalidate(&self, key: TuningKey) {
        self.entries.remove(&key);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}
