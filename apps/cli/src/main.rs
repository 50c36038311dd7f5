//! Meridian CLI - command-line access to model routing and experiments
//!
//! Provides a `meridian` command for inspecting the model catalog, asking the
//! router for a model, recording execution outcomes and reading the
//! aggregates and experiment results they produce.

mod commands;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{models, record, results, route, score, simulate, stats};
use context::AppContext;

/// Meridian - cost and quality aware model selection
#[derive(Parser, Debug)]
#[command(
    name = "meridian",
    author,
    version,
    about = "Meridian - pick the right model for every task",
    long_about = "Meridian routes LLM tasks to the model with the best quality, cost and latency trade-off,\nrecords how each call went and runs A/B tests between candidate models."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Path to a meridian.toml configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database for execution records (overrides the configured store)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List models in the catalog
    Models(models::ModelsArgs),

    /// Pick a model for a task
    ///
    /// Ranks every capable model under the chosen strategy and constraints and
    /// prints the winner, or the whole fallback chain with --fallback.
    Route(route::RouteArgs),

    /// Pick the top k models for a task
    Council(route::CouncilArgs),

    /// Score an output with the quality heuristics for its task type
    Score(score::ScoreArgs),

    /// Record the outcome of a model execution
    Record(record::RecordArgs),

    /// Attach user feedback to a recorded execution
    Feedback(record::FeedbackArgs),

    /// Show aggregated statistics for a task
    Stats(stats::StatsArgs),

    /// Compare models side by side for a task
    Compare(stats::CompareArgs),

    /// Find a cheaper model that still meets a quality bar
    CostAnalysis(stats::CostAnalysisArgs),

    /// Compute the verdict for executions recorded with --ab-test
    ///
    /// Re-declares the experiment's variants and compares the tagged
    /// executions in the database against the control.
    Results(results::ResultsArgs),

    /// Run a simulated A/B test against mock models
    ///
    /// Routes synthetic traffic through a two-variant experiment, executes it
    /// with the mock executor, records the outcomes and prints the verdict.
    Simulate(simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    let app = AppContext::build(args.config.as_deref(), args.db.as_deref())?;
    let json = args.json;

    match args.command {
        Command::Models(cmd) => models::execute(&app, &cmd, json),
        Command::Route(cmd) => route::execute(&app, &cmd, json),
        Command::Council(cmd) => route::council(&app, &cmd, json),
        Command::Score(cmd) => score::execute(&cmd, json),
        Command::Record(cmd) => record::execute(&app, cmd, json),
        Command::Feedback(cmd) => record::feedback(&app, cmd, json),
        Command::Stats(cmd) => stats::execute(&app, &cmd, json),
        Command::Compare(cmd) => stats::compare(&app, &cmd, json),
        Command::CostAnalysis(cmd) => stats::cost_analysis(&app, &cmd, json),
        Command::Results(cmd) => results::execute(&app, &cmd, json),
        Command::Simulate(cmd) => simulate::execute(&app, &cmd, json).await,
    }
}
