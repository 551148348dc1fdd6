//! Terminal formatting shared by the command handlers

use chrono::{DateTime, Utc};
use colored::*;
use keel_core::domain::{RunnerStatus, Status};

/// Colorize a run or job status for display
pub fn colorize_status(status: Status) -> ColoredString {
    let label = status.as_str();
    match status {
        Status::Queued => label.cyan(),
        Status::Running => label.yellow(),
        Status::Success => label.green(),
        Status::Failed => label.red(),
        Status::Canceled => label.dimmed(),
    }
}

/// Colorize runner status for display
pub fn colorize_runner_status(status: RunnerStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        RunnerStatus::Online => label.green(),
        RunnerStatus::Offline => label.red(),
        RunnerStatus::Busy => label.yellow(),
    }
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Whole seconds between two instants, if both are known
pub fn duration_secs(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some(end.signed_duration_since(start).num_seconds()),
        _ => None,
    }
}

/// Parse a single key=value pair
pub fn parse_key_val(s: &str) -> anyhow::Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

pub fn rule() -> ColoredString {
    "─".repeat(80).dimmed()
}
