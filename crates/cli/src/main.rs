//! Anomaly Engine CLI
//!
//! A command-line tool for dry-running the anomaly engine against sample
//! files and for inspecting and acknowledging recorded anomaly events.

mod commands;
mod output;

use std::path::PathBuf;

use anomaly_lib::{events::DEFAULT_LIST_LIMIT, EventFilter, Metric, Severity, Window};
use anyhow::Result;
use chrono::DateTime;
use clap::{Parser, Subcommand};
use commands::{evaluate, events};

/// Anomaly Engine CLI
#[derive(Parser)]
#[command(name = "anomalyctl")]
#[command(author, version, about = "CLI for the Anomaly Detection Engine", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the buckets a (metric, window) pair would be scored on
    Preview {
        /// Directory holding <metric>.jsonl sample files
        #[arg(long, env = "ANOMALY_SAMPLES_DIR")]
        samples: PathBuf,

        #[arg(long, short)]
        metric: Metric,

        #[arg(long, short, default_value = "15m")]
        window: Window,

        /// Evaluation time (RFC 3339 or epoch milliseconds), defaults to now
        #[arg(long, value_parser = parse_time)]
        now: Option<i64>,
    },

    /// Evaluate pairs once against sample files
    Evaluate {
        /// Directory holding <metric>.jsonl sample files
        #[arg(long, env = "ANOMALY_SAMPLES_DIR")]
        samples: PathBuf,

        /// Metrics to evaluate (all if omitted)
        #[arg(long, short, value_delimiter = ',')]
        metric: Vec<Metric>,

        /// Windows to evaluate (all if omitted)
        #[arg(long, short, value_delimiter = ',')]
        window: Vec<Window>,

        /// Evaluation time (RFC 3339 or epoch milliseconds), defaults to now
        #[arg(long, value_parser = parse_time)]
        now: Option<i64>,

        /// Sensitivity 1 (fires easily) to 5 (fires rarely)
        #[arg(long)]
        sensitivity: Option<i64>,

        /// Z-score and EWMA weights, e.g. 0.6,0.4
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,

        /// Minimum bucket count before a pair is evaluated
        #[arg(long)]
        min_support: Option<i64>,

        /// Append fired anomalies to this event store instead of a dry run
        #[arg(long)]
        events_file: Option<PathBuf>,
    },

    /// Inspect and acknowledge anomaly events
    #[command(subcommand)]
    Events(EventsCommands),
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// List events, newest first
    List {
        #[arg(long, env = "ANOMALY_EVENTS_PATH")]
        events_file: PathBuf,

        #[arg(long, short)]
        metric: Option<Metric>,

        #[arg(long, short)]
        severity: Option<Severity>,

        /// Only acknowledged (true) or unacknowledged (false) events
        #[arg(long, action = clap::ArgAction::Set)]
        acknowledged: Option<bool>,

        /// Earliest event time (RFC 3339 or epoch milliseconds)
        #[arg(long, value_parser = parse_time)]
        since: Option<i64>,

        /// Latest event time (RFC 3339 or epoch milliseconds)
        #[arg(long, value_parser = parse_time)]
        until: Option<i64>,

        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Show one event with its insight
    Show {
        id: String,

        #[arg(long, env = "ANOMALY_EVENTS_PATH")]
        events_file: PathBuf,
    },

    /// Acknowledge an event
    Ack {
        id: String,

        #[arg(long, env = "ANOMALY_EVENTS_PATH")]
        events_file: PathBuf,
    },
}

/// Parse an RFC 3339 timestamp or epoch milliseconds
fn parse_time(s: &str) -> Result<i64, String> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("expected RFC 3339 or epoch milliseconds: {}", e))
}

fn now_or(now: Option<i64>) -> i64 {
    now.unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
}

fn or_all<T: Copy>(selected: Vec<T>, all: &[T]) -> Vec<T> {
    if selected.is_empty() {
        all.to_vec()
    } else {
        selected
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Preview {
            samples,
            metric,
            window,
            now,
        } => {
            evaluate::preview(&samples, metric, window, now_or(now), cli.format).await?;
        }
        Commands::Evaluate {
            samples,
            metric,
            window,
            now,
            sensitivity,
            weights,
            min_support,
            events_file,
        } => {
            let flags = evaluate::TuningFlags {
                sensitivity,
                weights,
                min_support,
            };
            evaluate::evaluate(
                &samples,
                &or_all(metric, &Metric::ALL),
                &or_all(window, &Window::ALL),
                now_or(now),
                &flags,
                events_file,
                cli.format,
            )
            .await?;
        }
        Commands::Events(events_cmd) => match events_cmd {
            EventsCommands::List {
                events_file,
                metric,
                severity,
                acknowledged,
                since,
                until,
                limit,
            } => {
                let filter = EventFilter {
                    metric,
                    severity,
                    acknowledged,
                    from_ms: since,
                    to_ms: until,
                };
                events::list_events(&events_file, filter, limit, cli.format).await?;
            }
            EventsCommands::Show { id, events_file } => {
                events::show_event(&events_file, &id, cli.format).await?;
            }
            EventsCommands::Ack { id, events_file } => {
                events::ack_event(&events_file, &id, cli.format).await?;
            }
        },
    }

    Ok(())
}
