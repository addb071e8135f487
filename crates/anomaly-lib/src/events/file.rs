//! File-backed event store
//!
//! Keeps every event in memory and rewrites a JSON snapshot on each
//! mutation. Writes go to a temp file that is renamed over the snapshot, so a
//! crash never leaves a half-written file behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{apply_ack, select, AckOutcome, AnomalyEventStore, EventFilter};
use crate::error::{EngineError, Result};
use crate::models::AnomalyEvent;

/// Event store persisted to a single JSON file
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    events: Mutex<Vec<AnomalyEvent>>,
}

impl FileEventStore {
    /// Open the store, loading an existing snapshot if present
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let events = match tokio::fs::read(&path).await {
            Ok(data) if data.is_empty() => Vec::new(),
            Ok(data) => serde_json::from_slice::<Vec<AnomalyEvent>>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), events = events.len(), "Opened event store");
        Ok(Self {
            path,
            events: Mutex::new(events),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, events: &[AnomalyEvent]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(events)?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), events = events.len(), "Event store flushed");
        Ok(())
    }

    /// Flush `staged` and only then make it the live state
    ///
    /// The live vector is untouched until the save returns, so a save that
    /// fails or is cancelled by a timeout leaves no trace in memory.
    async fn commit(&self, live: &mut Vec<AnomalyEvent>, staged: Vec<AnomalyEvent>) -> Result<()> {
        self.save(&staged)
            .await
            .map_err(|e| persistence_error(&self.path, e))?;
        *live = staged;
        Ok(())
    }
}

fn persistence_error(path: &Path, e: EngineError) -> EngineError {
    EngineError::PersistenceFailure(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl AnomalyEventStore for FileEventStore {
    async fn append(&self, event: AnomalyEvent) -> Result<String> {
        let mut events = self.events.lock().await;
        if events.iter().any(|e| e.id == event.id) {
            return Err(EngineError::PersistenceFailure(format!(
                "duplicate event id {}",
                event.id
            )));
        }

        let id = event.id.clone();
        let mut staged = events.clone();
        staged.push(event);
        self.commit(&mut events, staged).await?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<AnomalyEvent>> {
        let events = self.events.lock().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let events = self.events.lock().await;
        Ok(select(events.iter(), filter, limit))
    }

    async fn acknowledge(&self, id: &str, at_ms: i64) -> Result<AckOutcome> {
        let mut events = self.events.lock().await;
        let idx = events
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| EngineError::EventNotFound(id.to_string()))?;

        let mut staged = events.clone();
        let outcome = apply_ack(&mut staged[idx], at_ms);
        if let AckOutcome::Acknowledged { .. } = outcome {
            self.commit(&mut events, staged).await?;
        }
        Ok(outcome)
    }
}
