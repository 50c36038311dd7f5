//! Heuristic quality scoring of a single output.

use super::parse_task;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use meridian_core::{QualityScore, QualityScorer, ScoringContext, TaskType};
use std::io::Read;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ScoreArgs {
    /// Task type the output was produced for
    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// File holding the output; reads stdin when omitted
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output text given inline
    #[arg(long, conflicts_with = "file")]
    pub text: Option<String>,

    /// Name the output should address
    #[arg(long)]
    pub recipient: Option<String>,

    /// Company the output should mention
    #[arg(long)]
    pub company: Option<String>,

    /// Keyword the output must contain (repeatable)
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,

    /// Source document, for summaries
    #[arg(long)]
    pub source_file: Option<PathBuf>,

    /// Message being replied to, for conversation replies
    #[arg(long)]
    pub inbound: Option<String>,
}

pub fn execute(args: &ScoreArgs, json: bool) -> Result<()> {
    let output = read_output(args)?;
    let source_text = args
        .source_file
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let context = ScoringContext {
        recipient_name: args.recipient.clone(),
        company_name: args.company.clone(),
        required_keywords: args.keywords.clone(),
        source_text,
        inbound_message: args.inbound.clone(),
        ..ScoringContext::default()
    };

    let score = QualityScorer::new().score(args.task, &output, &context)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&score)?);
    } else {
        print_score(&score);
    }
    Ok(())
}

fn read_output(args: &ScoreArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer).context("Failed to read output from stdin")?;
    Ok(buffer)
}

fn print_score(score: &QualityScore) {
    let headline = format!("{:.1}", score.score);
    let headline = if score.score >= 70.0 {
        headline.green()
    } else if score.score >= 50.0 {
        headline.yellow()
    } else {
        headline.red()
    };
    println!("{} quality: {}", score.task_type, headline.bold());
    for dimension in &score.dimensions {
        let detail = dimension.detail.as_deref().unwrap_or("");
        println!(
            "  {:<16} {:>5.1}  (weight {:.2})  {}",
            dimension.name,
            dimension.score,
            dimension.weight,
            detail.dimmed()
        );
    }
    if !score.flags.is_empty() {
        println!("  flags: {}", score.flags.join(", ").yellow());
    }
}
