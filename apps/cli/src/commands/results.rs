//! `results`: the verdict for executions tagged with `record --ab-test`.
//!
//! Experiment definitions live only in the process that created them, so the
//! variants are declared again here and matched against the tagged records
//! in the database. Traffic weights play no part in the verdict and are split
//! evenly.

use super::{format_cost, or_dash, parse_task};
use crate::context::AppContext;
use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use meridian_core::{ABTestConfig, ABTestResult, TaskType, TestOutcome, VariantConfig};
use tabled::{Table, Tabled, settings::Style};
use tracing::warn;

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Test id the executions were tagged with
    pub test_id: String,

    #[arg(short, long, value_parser = parse_task)]
    pub task: TaskType,

    /// Comma-separated variant model ids
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub variants: Vec<String>,

    /// Control variant; defaults to the first of --variants
    #[arg(long)]
    pub control: Option<String>,

    /// Significance level (defaults to the configured one)
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Quality samples each variant needs (defaults to the configured number)
    #[arg(long)]
    pub min_samples: Option<usize>,
}

impl ResultsArgs {
    fn config(&self) -> Result<ABTestConfig> {
        if self.variants.len() < 2 {
            bail!("results needs at least two variants");
        }
        if let Some(control) = &self.control {
            if !self.variants.contains(control) {
                bail!("--control {} is not one of --variants", control);
            }
        }

        let count = u32::try_from(self.variants.len()).context("Too many variants")?;
        let share = 100 / count;
        let variants = self
            .variants
            .iter()
            .enumerate()
            .map(|(i, model_id)| {
                // The first variant absorbs the remainder of an uneven split.
                let weight = if i == 0 { 100 - share * (count - 1) } else { share };
                let variant = VariantConfig::new(model_id.clone(), weight);
                let is_control = self.control.as_ref().map_or(i == 0, |c| c == model_id);
                if is_control { variant.control() } else { variant }
            })
            .collect();

        let mut config = ABTestConfig::new(self.test_id.clone(), self.test_id.clone(), self.task, variants);
        config.significance_level = self.alpha;
        config.min_sample_size = self.min_samples;
        Ok(config)
    }
}

pub fn execute(app: &AppContext, args: &ResultsArgs, json: bool) -> Result<()> {
    if !app.persistent {
        warn!("Reading from an in-memory store; pass --db to read recorded executions");
    }

    app.experiments.create(args.config()?)?;
    let result = app.experiments.compute_results(&args.test_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

#[derive(Tabled)]
struct VariantRow {
    #[tabled(rename = "Variant")]
    model: String,
    #[tabled(rename = "Runs")]
    executions: usize,
    #[tabled(rename = "Quality")]
    quality: String,
    #[tabled(rename = "Std dev")]
    std_dev: String,
    #[tabled(rename = "Cost/run")]
    cost: String,
    #[tabled(rename = "Latency ms")]
    latency: String,
}

pub fn print_result(result: &ABTestResult) {
    println!("{}", format!("A/B test {} ({})", result.test_id, result.task_type).bold());

    let rows: Vec<VariantRow> = result
        .variants
        .iter()
        .map(|v| VariantRow {
            model: match (v.is_control, v.active) {
                (true, _) => format!("{} (control)", v.model_id),
                (false, false) => format!("{} (inactive)", v.model_id),
                (false, true) => v.model_id.clone(),
            },
            executions: v.executions,
            quality: or_dash(v.mean_quality.map(|q| format!("{:.2}", q))),
            std_dev: or_dash(v.quality_variance.map(|var| format!("{:.2}", var.sqrt()))),
            cost: or_dash(v.mean_cost.map(format_cost)),
            latency: or_dash(v.mean_latency_ms.map(|l| format!("{:.0}", l))),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    for comparison in &result.comparisons {
        println!(
            "  {} vs {}: delta {}, p = {:.4} (adjusted {:.4}), d = {:.2}",
            comparison.model_id,
            comparison.control_id,
            or_dash(comparison.quality_delta.map(|d| format!("{:+.2}", d))),
            comparison.p_value,
            comparison.adjusted_p_value,
            comparison.effect_size
        );
    }

    match &result.outcome {
        TestOutcome::Winner { model_id } => println!("{} {}", "Winner:".bold(), model_id.green().bold()),
        TestOutcome::Inconclusive { reason } => println!("{} {}", "Inconclusive:".bold(), reason.to_string().yellow()),
    }
}
