//! In-memory event store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{apply_ack, select, AckOutcome, AnomalyEventStore, EventFilter};
use crate::error::{EngineError, Result};
use crate::models::AnomalyEvent;

/// Event store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, AnomalyEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl AnomalyEventStore for InMemoryEventStore {
    async fn append(&self, event: AnomalyEvent) -> Result<String> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(EngineError::PersistenceFailure(format!(
                "duplicate event id {}",
                event.id
            )));
        }
        let id = event.id.clone();
        events.insert(id.clone(), event);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<AnomalyEvent>> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let events = self.events.read().await;
        Ok(select(events.values(), filter, limit))
    }

    async fn acknowledge(&self, id: &str, at_ms: i64) -> Result<AckOutcome> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| EngineError::EventNotFound(id.to_string()))?;
        Ok(apply_ack(event, at_ms))
    }
}
