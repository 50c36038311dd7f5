//! Aggregate reads over recorded executions: `stats`, `compare` and
//! `cost-analysis`.

use super::{format_cost, format_evidence, or_dash, parse_task};
use crate::context::AppContext;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use meridian_core::{ModelStats, TaskType};
use tabled::{Table, Tabled, settings::Style};

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Task type to aggregate
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// Restrict to one model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Trailing window in hours (defaults to the router's stats window)
    #[arg(short, long)]
    pub window_hours: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Task type to compare on
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// Comma-separated model ids
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub models: Vec<String>,

    #[arg(short, long)]
    pub window_hours: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CostAnalysisArgs {
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// Quality bar the cheaper model must meet (defaults to the configured one)
    #[arg(long)]
    pub min_quality: Option<f64>,

    #[arg(short, long)]
    pub window_hours: Option<u64>,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Runs")]
    total: usize,
    #[tabled(rename = "Success")]
    success: String,
    #[tabled(rename = "Quality")]
    quality: String,
    #[tabled(rename = "Rating")]
    rating: String,
    #[tabled(rename = "Cost/run")]
    cost: String,
    #[tabled(rename = "p50 ms")]
    p50: String,
    #[tabled(rename = "p95 ms")]
    p95: String,
}

impl From<&ModelStats> for StatsRow {
    fn from(stats: &ModelStats) -> Self {
        Self {
            model: stats.model_id.clone(),
            total: stats.total,
            success: format!("{:.0}%", stats.success_rate() * 100.0),
            quality: or_dash(stats.mean_quality.map(|q| format!("{:.1} (n={})", q, stats.quality_samples))),
            rating: or_dash(stats.mean_rating.map(|r| format!("{:.2}", r))),
            cost: format_cost(stats.mean_cost),
            p50: format!("{:.0}", stats.p50_latency_ms),
            p95: format!("{:.0}", stats.p95_latency_ms),
        }
    }
}

pub fn execute(app: &AppContext, args: &StatsArgs, json: bool) -> Result<()> {
    let window = app.window(args.window_hours)?;
    let stats: Vec<ModelStats> = match &args.model {
        Some(model_id) => app.tracker.get_stats(model_id, args.task, window)?.into_iter().collect(),
        None => app.tracker.task_stats(args.task, window)?.into_values().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    if stats.is_empty() {
        println!("{}", format!("No executions recorded for {} in the last {}h.", args.task, window.num_hours()).yellow());
        return Ok(());
    }

    println!("{}", format!("{} over the last {}h", args.task, window.num_hours()).bold());
    let rows: Vec<StatsRow> = stats.iter().map(StatsRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

pub fn compare(app: &AppContext, args: &CompareArgs, json: bool) -> Result<()> {
    if args.models.len() < 2 {
        bail!("compare needs at least two models");
    }
    let window = app.window(args.window_hours)?;
    let comparison = app.tracker.compare(args.task, &args.models, window)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
        return Ok(());
    }

    let mut rows = Vec::new();
    let mut missing = Vec::new();
    for entry in &comparison.entries {
        match &entry.stats {
            Some(stats) => rows.push(StatsRow::from(stats)),
            None => missing.push(entry.model_id.as_str()),
        }
    }
    if let Some(leader) = comparison.leader() {
        println!("{} {}", "Leader:".bold(), leader.model_id.green());
    }
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    if !missing.is_empty() {
        println!("{}", format!("No data: {}", missing.join(", ")).yellow());
    }
    Ok(())
}

pub fn cost_analysis(app: &AppContext, args: &CostAnalysisArgs, json: bool) -> Result<()> {
    let window = app.window(args.window_hours)?;
    let min_quality = args.min_quality.unwrap_or(app.config.tracker.cost_analysis_min_quality);
    let analysis = app.tracker.cost_analysis(args.task, window, min_quality)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!("{}", format!("Cost analysis for {} (quality >= {:.0})", analysis.task_type, min_quality).bold());
    println!("  executions:      {}", analysis.executions);
    println!("  current average: {}", or_dash(analysis.current_avg_cost.map(format_cost)));
    match &analysis.recommendation {
        Some(rec) => {
            println!("  recommended:     {}", rec.model_id.green());
            println!(
                "  expected:        quality {}, {} per request",
                format_evidence(format!("{:.1}", rec.expected_quality), rec.quality_evidence),
                format_evidence(format_cost(rec.expected_cost_per_request), rec.cost_evidence)
            );
            println!("  savings:         {} per request", or_dash(analysis.savings_per_request.map(format_cost)));
            println!("  projected:       {}", or_dash(analysis.projected_savings.map(format_cost)));
        }
        None => println!("  {}", "No model is expected to reach the quality bar.".yellow()),
    }
    Ok(())
}
