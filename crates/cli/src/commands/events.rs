//! Inspect and acknowledge recorded anomaly events

use std::path::Path;

use anomaly_lib::{
    AckOutcome, AnomalyEvent, AnomalyEventStore, EngineError, EventFilter, FileEventStore,
};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use tabled::Tabled;

use crate::output::{
    color_severity, format_timestamp, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Ack")]
    acknowledged: String,
}

impl From<&AnomalyEvent> for EventRow {
    fn from(e: &AnomalyEvent) -> Self {
        Self {
            id: e.id.clone(),
            time: format_timestamp(e.ts),
            metric: e.metric.to_string(),
            window: e.window.to_string(),
            score: format!("{:.3}", e.score),
            severity: color_severity(e.severity),
            acknowledged: match e.acknowledged_at {
                Some(at) => format_timestamp(at),
                None => "no".to_string(),
            },
        }
    }
}

async fn open_store(path: &Path) -> Result<FileEventStore> {
    if !path.exists() {
        bail!("event store {} does not exist", path.display());
    }
    FileEventStore::open(path)
        .await
        .with_context(|| format!("failed to open event store {}", path.display()))
}

/// List events, newest first
pub async fn list_events(
    path: &Path,
    filter: EventFilter,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let store = open_store(path).await?;
    let events = store.list(&filter, limit).await?;

    let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
    print_rows(rows, &events, format)?;
    if let OutputFormat::Table = format {
        if !events.is_empty() {
            println!("\nTotal: {} events", events.len());
        }
    }
    Ok(())
}

/// Show one event with its insight
pub async fn show_event(path: &Path, id: &str, format: OutputFormat) -> Result<()> {
    let store = open_store(path).await?;
    let Some(event) = store.get(id).await? else {
        bail!("anomaly event not found: {}", id);
    };

    match format {
        OutputFormat::Json => print_json(&event)?,
        OutputFormat::Table => {
            println!("{}", event.insight.title.bold());
            println!("{}", "=".repeat(60));
            println!("ID:        {}", event.id.cyan());
            println!("Time:      {}", format_timestamp(event.ts));
            println!("Score:     {:.3}", event.score);
            println!("Severity:  {}", color_severity(event.severity));
            println!("Reason:    {}", event.reason);
            match event.acknowledged_at {
                Some(at) => println!("Acked:     {}", format_timestamp(at)),
                None => println!("Acked:     {}", "no".yellow()),
            }
            println!();
            println!("{}", event.insight.description);
            println!();
            println!("{}", "Likely causes".bold());
            for cause in &event.insight.causes {
                println!("  - {}", cause);
            }
            println!("{}", "Suggested actions".bold());
            for action in &event.insight.actions {
                println!("  - {}", action);
            }
        }
    }
    Ok(())
}

/// Acknowledge an event; acknowledging twice only reports the first time
pub async fn ack_event(path: &Path, id: &str, format: OutputFormat) -> Result<()> {
    let store = open_store(path).await?;
    let now = chrono::Utc::now().timestamp_millis();

    let outcome = match store.acknowledge(id, now).await {
        Ok(outcome) => outcome,
        Err(EngineError::EventNotFound(_)) => bail!("anomaly event not found: {}", id),
        Err(e) => return Err(e).context("failed to acknowledge event"),
    };

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => match outcome {
            AckOutcome::Acknowledged { at } => {
                print_success(&format!("Acknowledged {} at {}", id, format_timestamp(at)))
            }
            AckOutcome::AlreadyAcknowledged { at } => print_warning(&format!(
                "{} was already acknowledged at {}",
                id,
                format_timestamp(at)
            )),
        },
    }
    Ok(())
}
