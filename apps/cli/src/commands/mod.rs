//! Command implementations for the Meridian CLI.

pub mod models;
pub mod record;
pub mod route;
pub mod results;
pub mod score;
pub mod simulate;
pub mod stats;

use meridian_core::{Evidence, TaskType};

/// Parses a task type argument.
pub fn parse_task(s: &str) -> Result<TaskType, String> {
    s.parse().map_err(|e: meridian_core::MeridianError| e.to_string())
}

/// Formats an optional figure for tables.
pub fn or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn format_cost(cost: f64) -> String {
    format!("${:.6}", cost)
}

pub fn format_evidence(value: String, evidence: Evidence) -> String {
    match evidence {
        Evidence::History => value,
        Evidence::Prior => format!("{} (prior)", value),
    }
}
