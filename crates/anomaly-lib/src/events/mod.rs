//! Anomaly event persistence and acknowledgment
//!
//! Events are append-only. The only permitted mutation is the one-time
//! acknowledgment transition, performed as a compare-and-set against
//! `acknowledged == false` so duplicate requests are harmless.

mod file;
mod memory;

pub use file::FileEventStore;
pub use memory::InMemoryEventStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AnomalyEvent, Metric, Severity};

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Optional predicates for [`AnomalyEventStore::list`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub metric: Option<Metric>,
    pub severity: Option<Severity>,
    pub acknowledged: Option<bool>,
    /// Inclusive lower bound on `ts`
    pub from_ms: Option<i64>,
    /// Inclusive upper bound on `ts`
    pub to_ms: Option<i64>,
}

impl EventFilter {
    pub fn matches(&self, event: &AnomalyEvent) -> bool {
        self.metric.map_or(true, |m| event.metric == m)
            && self.severity.map_or(true, |s| event.severity == s)
            && self.acknowledged.map_or(true, |a| event.acknowledged == a)
            && self.from_ms.map_or(true, |from| event.ts >= from)
            && self.to_ms.map_or(true, |to| event.ts <= to)
    }
}

/// Result of an acknowledgment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AckOutcome {
    /// The event transitioned to acknowledged at `at`
    Acknowledged { at: i64 },
    /// No-op: the event was already acknowledged at `at`
    AlreadyAcknowledged { at: i64 },
}

impl AckOutcome {
    pub fn acknowledged_at(&self) -> i64 {
        match self {
            AckOutcome::Acknowledged { at } | AckOutcome::AlreadyAcknowledged { at } => *at,
        }
    }
}

/// Trait for anomaly event persistence
#[async_trait]
pub trait AnomalyEventStore: Send + Sync {
    /// Persist a new event and return its id
    async fn append(&self, event: AnomalyEvent) -> Result<String>;

    async fn get(&self, id: &str) -> Result<Option<AnomalyEvent>>;

    /// Events matching `filter`, newest first, at most `limit`
    async fn list(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AnomalyEvent>>;

    /// Mark `id` acknowledged at `at_ms` unless it already is
    ///
    /// Unknown ids fail with [`crate::EngineError::EventNotFound`].
    async fn acknowledge(&self, id: &str, at_ms: i64) -> Result<AckOutcome>;
}

/// Filter, order by `ts desc` (ties by id) and truncate
pub(crate) fn select<'a>(
    events: impl Iterator<Item = &'a AnomalyEvent>,
    filter: &EventFilter,
    limit: usize,
) -> Vec<AnomalyEvent> {
    let mut selected: Vec<AnomalyEvent> = events.filter(|e| filter.matches(e)).cloned().collect();
    selected.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| a.id.cmp(&b.id)));
    selected.truncate(limit);
    selected
}

/// Apply the acknowledgment transition in place
pub(crate) fn apply_ack(event: &mut AnomalyEvent, at_ms: i64) -> AckOutcome {
    match (event.acknowledged, event.acknowledged_at) {
        (true, Some(at)) => AckOutcome::AlreadyAcknowledged { at },
        // Acknowledged without a recorded time; keep it as-is
        (true, None) => AckOutcome::AlreadyAcknowledged { at: at_ms },
        (false, _) => {
            event.acknowledged = true;
            event.acknowledged_at = Some(at_ms);
            AckOutcome::Acknowledged { at: at_ms }
        }
    }
}
