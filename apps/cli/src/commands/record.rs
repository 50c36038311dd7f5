//! `record` and `feedback`.

use super::{format_cost, or_dash, parse_task};
use crate::context::AppContext;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use meridian_core::{ExecutionOutcome, ScoringContext, TaskType, UserFeedback};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Model that served the request
    #[arg(short, long)]
    pub model: String,

    /// Task type of the request
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    #[arg(long, default_value = "0")]
    pub input_tokens: u32,

    #[arg(long, default_value = "0")]
    pub output_tokens: u32,

    /// Wall-clock latency in milliseconds
    #[arg(long, default_value = "0")]
    pub latency_ms: f64,

    /// Quality score (0-100) measured elsewhere
    #[arg(long)]
    pub quality: Option<f64>,

    /// File holding the raw output, scored automatically when --quality is absent
    #[arg(long, conflicts_with = "quality")]
    pub output_file: Option<PathBuf>,

    /// Provider error message; marks the execution as failed
    #[arg(long)]
    pub error: Option<String>,

    /// A/B test the execution belongs to; read back with `meridian results`
    #[arg(long)]
    pub ab_test: Option<String>,

    /// Variant the execution was assigned to; must equal --model (the default)
    #[arg(long, requires = "ab_test")]
    pub variant: Option<String>,
}

#[derive(Args, Debug)]
pub struct FeedbackArgs {
    /// Execution id printed by `record`
    pub execution_id: Uuid,

    /// Rating from 1 (poor) to 5 (excellent)
    #[arg(short, long)]
    pub rating: u8,

    #[arg(long)]
    pub comment: Option<String>,
}

pub fn execute(app: &AppContext, args: RecordArgs, json: bool) -> Result<()> {
    if !app.persistent {
        warn!("Recording to an in-memory store; pass --db to keep records");
    }

    let mut outcome = ExecutionOutcome::new(args.model, args.task)
        .with_tokens(args.input_tokens, args.output_tokens)
        .with_latency_ms(args.latency_ms);
    if let Some(quality) = args.quality {
        outcome = outcome.with_quality(quality);
    }
    if let Some(path) = &args.output_file {
        let output =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        outcome = outcome.with_output(output, Some(ScoringContext::default()));
    }
    if let Some(error) = args.error {
        outcome = outcome.with_error(error);
    }
    if let Some(test_id) = args.ab_test {
        let variant = args.variant.unwrap_or_else(|| outcome.model_id.clone());
        outcome = outcome.with_ab_test(test_id, variant);
    }

    let record = app.tracker.record_execution(outcome)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let status = if record.error.is_some() { "failed".red() } else { "ok".green() };
        println!("{} {}", "Recorded".bold(), record.id);
        println!("  model:   {} ({})", record.model_id, status);
        println!("  cost:    {}", format_cost(record.cost));
        println!("  quality: {}", or_dash(record.quality_score.map(|q| format!("{:.1}", q))));
    }
    Ok(())
}

pub fn feedback(app: &AppContext, args: FeedbackArgs, json: bool) -> Result<()> {
    app.tracker.record_feedback(args.execution_id, UserFeedback::new(args.rating, args.comment))?;
    let record = app.tracker.get_execution(args.execution_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{} {} rated {}/5", "Feedback saved:".bold(), record.id, args.rating);
    }
    Ok(())
}
