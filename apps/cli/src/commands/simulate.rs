//! Simulated A/B test.
//!
//! Drives synthetic traffic through a two-variant experiment with the mock
//! executor. Each model answers with a latency around its latency class and a
//! quality drawn around its catalog prior (plus `--lift` for the treatment), so
//! the verdict shows how much traffic a real difference of that size needs.

use super::parse_task;
use super::results::print_result;
use crate::context::AppContext;
use anyhow::{Context, Result, bail};
use clap::Args;
use meridian_abstraction::{ExecutionParameters, MockBehavior, MockExecutor, ModelExecutor};
use meridian_core::{ABTestConfig, ExecutionOutcome, RouteRequest, TaskType, VariantConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(short, long, value_parser = parse_task, default_value = "email_generation")]
    pub task: TaskType,

    /// Control model
    #[arg(long, default_value = "claude-haiku-4.5")]
    pub control: String,

    /// Treatment model
    #[arg(long, default_value = "gpt-4o-mini")]
    pub treatment: String,

    /// Share of traffic sent to the treatment, in percent
    #[arg(long, default_value = "50", value_parser = clap::value_parser!(u32).range(1..100))]
    pub split: u32,

    /// Number of simulated requests
    #[arg(short = 'n', long, default_value = "400")]
    pub requests: usize,

    /// Quality points added to the treatment's prior
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub lift: f64,

    /// Half-width of the uniform quality noise
    #[arg(long, default_value = "10")]
    pub noise: f64,

    /// Fraction of requests that fail at the provider
    #[arg(long, default_value = "0")]
    pub failure_rate: f64,

    #[arg(long, default_value = "42")]
    pub seed: u64,
}

pub async fn execute(app: &AppContext, args: &SimulateArgs, json: bool) -> Result<()> {
    if args.control == args.treatment {
        bail!("control and treatment must be different models");
    }
    if !(0.0..1.0).contains(&args.failure_rate) {
        bail!("--failure-rate must be in [0, 1)");
    }
    if args.noise < 0.0 {
        bail!("--noise must not be negative");
    }

    let mut true_quality = HashMap::new();
    let executor = MockExecutor::new();
    for (model_id, lift) in [(&args.control, 0.0), (&args.treatment, args.lift)] {
        let descriptor = app.registry.get(model_id).with_context(|| format!("Unknown model {}", model_id))?;
        true_quality.insert(model_id.clone(), (descriptor.quality_prior + lift).clamp(0.0, 100.0));
        let latency = Duration::from_secs_f64(descriptor.latency_class.nominal_ms() / 1000.0);
        executor.set_behavior(model_id.clone(), MockBehavior::default().with_latency(latency))?;
    }

    let test_id = format!("sim-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    app.experiments.create(ABTestConfig::new(
        test_id.clone(),
        format!("{} vs {}", args.control, args.treatment),
        args.task,
        vec![
            VariantConfig::new(args.control.clone(), 100 - args.split).control(),
            VariantConfig::new(args.treatment.clone(), args.split),
        ],
    ))?;
    app.experiments.start(&test_id)?;
    info!(test_id = %test_id, requests = args.requests, "Starting simulation");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let parameters = ExecutionParameters::default();
    for i in 0..args.requests {
        let request = RouteRequest::new(args.task).in_experiment(test_id.clone(), format!("sim-key-{}", i));
        let decision = app.router.route(&request)?;
        let model_id = decision.model_id;

        let prompt = format!("Simulated {} request #{}", args.task, i);
        let output = executor.execute(&model_id, &prompt, &parameters).await?;
        let jitter = rng.gen_range(0.7..1.3);
        let mut outcome = ExecutionOutcome::new(model_id.clone(), args.task)
            .with_tokens(output.input_tokens, output.output_tokens)
            .with_latency_ms(output.latency_ms() * jitter)
            .with_ab_test(test_id.clone(), model_id.clone());

        outcome = if rng.gen_bool(args.failure_rate) {
            outcome.with_error("simulated provider failure")
        } else {
            let noise = if args.noise > 0.0 { rng.gen_range(-args.noise..=args.noise) } else { 0.0 };
            outcome.with_quality((true_quality[&model_id] + noise).clamp(0.0, 100.0))
        };
        app.tracker.record_execution(outcome)?;
    }

    app.experiments.complete(&test_id)?;
    let result = app.experiments.compute_results(&test_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}
