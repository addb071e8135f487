//! Output formatting utilities

use anomaly_lib::{EvaluationStatus, Severity};
use chrono::{TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the raw values as JSON
pub fn print_rows<R: Tabled, T: Serialize>(rows: Vec<R>, raw: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }
        OutputFormat::Json => print_json(raw)?,
    }
    Ok(())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Epoch milliseconds as a UTC timestamp
pub fn format_timestamp(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

pub fn format_score(score: Option<f64>) -> String {
    score.map(|s| format!("{:.3}", s)).unwrap_or_else(|| "-".to_string())
}

/// Color severity based on value
pub fn color_severity(severity: Severity) -> String {
    let s = severity.as_str();
    match severity {
        Severity::Low => s.blue().to_string(),
        Severity::Medium => s.yellow().to_string(),
        Severity::High => s.red().bold().to_string(),
    }
}

/// Color evaluation status
pub fn color_status(status: EvaluationStatus) -> String {
    let s = status.as_str();
    match status {
        EvaluationStatus::Fired => s.red().to_string(),
        EvaluationStatus::NotFired => s.green().to_string(),
        EvaluationStatus::Skipped => s.dimmed().to_string(),
    }
}
