//! `route` and `council`.

use super::{format_cost, format_evidence, parse_task};
use crate::context::AppContext;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use meridian_core::{RouteConstraints, RouteRequest, RoutingDecision, RoutingStrategy, TaskType};
use tabled::{Table, Tabled, settings::Style};

fn parse_strategy(s: &str) -> Result<RoutingStrategy, String> {
    s.parse().map_err(|e: meridian_core::MeridianError| e.to_string())
}

/// Options shared by `route` and `council`.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Task type to route
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// Strategy (best_quality, best_cost, fastest, balanced); defaults to the configured one
    #[arg(short, long, value_parser = parse_strategy)]
    pub strategy: Option<RoutingStrategy>,

    /// Minimum expected quality (0-100)
    #[arg(long)]
    pub min_quality: Option<f64>,

    /// Maximum expected cost per request in USD
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Maximum expected latency in milliseconds
    #[arg(long)]
    pub max_latency_ms: Option<f64>,

    /// Minimum context window in tokens
    #[arg(long)]
    pub min_context: Option<u32>,

    /// Model ids to leave out (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
}

impl RequestArgs {
    fn request(&self) -> RouteRequest {
        let mut request = RouteRequest::new(self.task).with_constraints(RouteConstraints {
            min_quality_score: self.min_quality,
            max_cost_per_request: self.max_cost,
            max_latency_ms: self.max_latency_ms,
            min_context_tokens: self.min_context,
            exclude_models: self.exclude.clone(),
        });
        if let Some(strategy) = self.strategy {
            request = request.with_strategy(strategy);
        }
        request
    }
}

#[derive(Args, Debug)]
pub struct RouteArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Print the ordered fallback chain instead of a single model
    #[arg(long)]
    pub fallback: bool,
}

#[derive(Args, Debug)]
pub struct CouncilArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Number of models to return
    #[arg(short, default_value = "3")]
    pub k: usize,
}

pub fn execute(app: &AppContext, args: &RouteArgs, json: bool) -> Result<()> {
    let request = args.request.request();

    if args.fallback {
        let plan = app.router.route_with_fallback(&request)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            println!("{}", format!("Fallback chain for {}", plan.task_type()).bold());
            print_decisions(plan.candidates());
        }
        return Ok(());
    }

    let decision = app.router.route(&request)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        println!("{}", decision.model_id.bold().green());
        println!("  strategy: {} ({})", decision.strategy, decision.decision_type);
        if let Some(score) = decision.score {
            println!("  score:    {:.4}", score);
        }
        println!("  {}", decision.rationale.dimmed());
    }
    Ok(())
}

pub fn council(app: &AppContext, args: &CouncilArgs, json: bool) -> Result<()> {
    if args.k == 0 {
        bail!("-k must be at least 1");
    }
    let decisions = app.router.council_for(&args.request.request(), args.k)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&decisions)?);
    } else {
        println!("{}", format!("Council of {} for {}", decisions.len(), args.request.task).bold());
        print_decisions(&decisions);
    }
    Ok(())
}

#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "#")]
    rank: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Quality")]
    quality: String,
    #[tabled(rename = "Cost/request")]
    cost: String,
    #[tabled(rename = "Latency ms")]
    latency: String,
}

fn print_decisions(decisions: &[RoutingDecision]) {
    let rows: Vec<DecisionRow> = decisions
        .iter()
        .enumerate()
        .map(|(i, d)| DecisionRow {
            rank: d.rank.unwrap_or(i + 1).to_string(),
            model: d.model_id.clone(),
            score: d.score.map_or_else(|| "experiment".to_string(), |s| format!("{:.4}", s)),
            quality: format_evidence(format!("{:.1}", d.candidate.expected_quality), d.candidate.quality_evidence),
            cost: format_evidence(format_cost(d.candidate.expected_cost), d.candidate.cost_evidence),
            latency: format_evidence(
                format!("{:.0}", d.candidate.expected_latency_ms),
                d.candidate.latency_evidence,
            ),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}
