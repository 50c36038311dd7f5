//! Catalog listing.

use super::{format_cost, parse_task};
use crate::context::AppContext;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use meridian_core::TaskType;
use tabled::{Table, Tabled, settings::Style};

#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// Only models capable of this task type
    #[arg(short, long, value_parser = parse_task)]
    pub task: Option<TaskType>,
}

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "In/1k")]
    input: String,
    #[tabled(rename = "Out/1k")]
    output: String,
    #[tabled(rename = "Context")]
    context: u32,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Prior")]
    prior: String,
    #[tabled(rename = "Tasks")]
    tasks: usize,
}

pub fn execute(app: &AppContext, args: &ModelsArgs, json: bool) -> Result<()> {
    let models = match args.task {
        Some(task_type) => app.registry.list(task_type),
        None => app.registry.snapshot().all(),
    };

    if json {
        let list: Vec<_> = models.iter().map(|m| m.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if models.is_empty() {
        println!("{}", "No models found.".yellow());
        return Ok(());
    }

    let rows: Vec<ModelRow> = models
        .iter()
        .map(|m| ModelRow {
            id: m.id.clone(),
            provider: m.provider.clone(),
            input: format_cost(m.cost_per_1k_input),
            output: format_cost(m.cost_per_1k_output),
            context: m.max_context_tokens,
            latency: m.latency_class.to_string(),
            prior: format!("{:.0}", m.quality_prior),
            tasks: m.capabilities.len(),
        })
        .collect();

    println!();
    println!("{}", format!("{} models", rows.len()).bold().green());
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
