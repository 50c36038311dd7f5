//! Variant comparison for a finished (or running) experiment.

use super::{ABTestConfig, TestStatus, VariantConfig};
use super::stats::{SampleSummary, cohens_d, welch_t_test};
use crate::tracker::{ExecutionRecord, mean};
use crate::types::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregates for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub model_id: String,
    pub is_control: bool,
    /// Inactive variants are reported only. They are not compared, corrected
    /// for, or held to the minimum sample size.
    pub active: bool,
    /// All tagged executions, failed ones included.
    pub executions: usize,
    /// Quality observations used in the significance test.
    pub samples: usize,
    pub mean_quality: Option<f64>,
    pub quality_variance: Option<f64>,
    pub mean_cost: Option<f64>,
    pub mean_latency_ms: Option<f64>,
    pub success_rate: Option<f64>,
}

/// One treatment measured against the control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantComparison {
    pub model_id: String,
    pub control_id: String,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    /// Raw two-sided p-value.
    pub p_value: f64,
    /// Bonferroni-adjusted for the number of active treatments, capped at 1.
    pub adjusted_p_value: f64,
    /// Cohen's d of the treatment relative to the control.
    pub effect_size: f64,
    /// Treatment minus control.
    pub quality_delta: Option<f64>,
    pub cost_delta: Option<f64>,
    pub latency_delta: Option<f64>,
    /// `adjusted_p_value < alpha`.
    pub significant: bool,
}

/// Why no winner was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveReason {
    /// No active variant has a single quality sample.
    NoData,
    /// At least one active variant is below the minimum sample size.
    InsufficientSamples,
    /// The differences are not statistically significant.
    NotSignificant,
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InconclusiveReason::NoData => write!(f, "no data"),
            InconclusiveReason::InsufficientSamples => write!(f, "insufficient samples"),
            InconclusiveReason::NotSignificant => write!(f, "not significant"),
        }
    }
}

/// The verdict of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestOutcome {
    Winner { model_id: String },
    Inconclusive { reason: InconclusiveReason },
}

impl TestOutcome {
    /// The winning model, if any.
    pub fn winner(&self) -> Option<&str> {
        match self {
            TestOutcome::Winner { model_id } => Some(model_id),
            TestOutcome::Inconclusive { .. } => None,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Winner { model_id } => write!(f, "winner: {model_id}"),
            TestOutcome::Inconclusive { reason } => write!(f, "inconclusive ({reason})"),
        }
    }
}

/// Result of `ABTestManager::compute_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ABTestResult {
    pub test_id: String,
    pub task_type: TaskType,
    pub status: TestStatus,
    pub computed_at: DateTime<Utc>,
    pub significance_level: f64,
    pub min_sample_size: usize,
    /// In declaration order.
    pub variants: Vec<VariantResult>,
    /// One entry per active treatment, in declaration order.
    pub comparisons: Vec<VariantComparison>,
    /// Adjusted p-value of the deciding comparison.
    pub p_value: Option<f64>,
    /// Effect size of the deciding comparison.
    pub effect_size: Option<f64>,
    pub outcome: TestOutcome,
}

struct VariantData {
    result: VariantResult,
    quality: Option<SampleSummary>,
}

fn variant_data(variant: &VariantConfig, is_control: bool, records: &[ExecutionRecord]) -> VariantData {
    let model_id = variant.model_id.as_str();
    let records: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.variant.as_deref().unwrap_or(&r.model_id) == model_id)
        .collect();
    let qualities: Vec<f64> =
        records.iter().filter(|r| r.succeeded()).filter_map(|r| r.quality_score).collect();
    let quality = SampleSummary::from_values(&qualities);
    let executions = records.len();
    let succeeded = records.iter().filter(|r| r.succeeded()).count();

    VariantData {
        result: VariantResult {
            model_id: model_id.to_string(),
            is_control,
            active: variant.active,
            executions,
            samples: qualities.len(),
            mean_quality: quality.map(|q| q.mean),
            quality_variance: quality.map(|q| q.variance),
            mean_cost: mean(&records.iter().map(|r| r.cost).collect::<Vec<_>>()),
            mean_latency_ms: mean(&records.iter().map(|r| r.latency_ms).collect::<Vec<_>>()),
            success_rate: (executions > 0).then(|| succeeded as f64 / executions as f64),
        },
        quality,
    }
}

fn delta(treatment: Option<f64>, control: Option<f64>) -> Option<f64> {
    Some(treatment? - control?)
}

pub(super) fn compute(
    config: &ABTestConfig,
    records: &[ExecutionRecord],
    alpha: f64,
    min_sample_size: usize,
) -> ABTestResult {
    let control_id = config.control().map(|c| c.model_id.clone()).unwrap_or_default();
    let data: Vec<VariantData> = config
        .variants
        .iter()
        .map(|v| variant_data(v, v.model_id == control_id, records))
        .collect();

    let active = data.iter().filter(|d| d.result.active).count();
    let treatments = active.saturating_sub(1).max(1) as f64;
    let empty = SampleSummary { n: 0, mean: 0.0, variance: 0.0 };
    let control = data.iter().find(|d| d.result.is_control);
    let control_quality = control.and_then(|c| c.quality).unwrap_or(empty);

    let comparisons: Vec<VariantComparison> = data
        .iter()
        .filter(|d| d.result.active && !d.result.is_control)
        .map(|d| {
            let treatment_quality = d.quality.unwrap_or(empty);
            let test = welch_t_test(&control_quality, &treatment_quality);
            let adjusted_p_value = (test.p_value * treatments).min(1.0);
            let control_result = control.map(|c| &c.result);
            VariantComparison {
                model_id: d.result.model_id.clone(),
                control_id: control_id.clone(),
                t_statistic: test.t_statistic,
                degrees_of_freedom: test.degrees_of_freedom,
                p_value: test.p_value,
                adjusted_p_value,
                effect_size: cohens_d(&control_quality, &treatment_quality),
                quality_delta: delta(d.result.mean_quality, control_result.and_then(|c| c.mean_quality)),
                cost_delta: delta(d.result.mean_cost, control_result.and_then(|c| c.mean_cost)),
                latency_delta: delta(d.result.mean_latency_ms, control_result.and_then(|c| c.mean_latency_ms)),
                significant: adjusted_p_value < alpha,
            }
        })
        .collect();

    let (outcome, deciding) = decide(&data, &comparisons, &control_id, min_sample_size);

    ABTestResult {
        test_id: config.id.clone(),
        task_type: config.task_type,
        status: config.status,
        computed_at: Utc::now(),
        significance_level: alpha,
        min_sample_size,
        variants: data.into_iter().map(|d| d.result).collect(),
        p_value: deciding.map(|c| c.adjusted_p_value),
        effect_size: deciding.map(|c| c.effect_size),
        comparisons,
        outcome,
    }
}

/// Picks the outcome and the comparison it rests on.
///
/// A treatment wins when it is significantly better than the control; among
/// several such treatments the one with the highest mean quality wins. The
/// control wins only when every treatment is significantly worse.
fn decide<'c>(
    data: &[VariantData],
    comparisons: &'c [VariantComparison],
    control_id: &str,
    min_sample_size: usize,
) -> (TestOutcome, Option<&'c VariantComparison>) {
    let inconclusive = |reason| TestOutcome::Inconclusive { reason };
    let most_decisive = comparisons.iter().min_by(|a, b| a.adjusted_p_value.total_cmp(&b.adjusted_p_value));

    let active: Vec<&VariantData> = data.iter().filter(|d| d.result.active).collect();
    if active.iter().all(|d| d.result.samples == 0) {
        return (inconclusive(InconclusiveReason::NoData), None);
    }
    if active.iter().any(|d| d.result.samples < min_sample_size) {
        return (inconclusive(InconclusiveReason::InsufficientSamples), most_decisive);
    }

    let better = comparisons
        .iter()
        .filter(|c| c.significant && c.t_statistic > 0.0)
        .max_by(|a, b| {
            let qa = a.quality_delta.unwrap_or(f64::NEG_INFINITY);
            let qb = b.quality_delta.unwrap_or(f64::NEG_INFINITY);
            qa.total_cmp(&qb).then_with(|| b.adjusted_p_value.total_cmp(&a.adjusted_p_value))
        });
    if let Some(winner) = better {
        return (TestOutcome::Winner { model_id: winner.model_id.clone() }, Some(winner));
    }

    let control_dominates =
        !comparisons.is_empty() && comparisons.iter().all(|c| c.significant && c.t_statistic < 0.0);
    if control_dominates {
        let weakest = comparisons.iter().max_by(|a, b| a.adjusted_p_value.total_cmp(&b.adjusted_p_value));
        return (TestOutcome::Winner { model_id: control_id.to_string() }, weakest);
    }

    (inconclusive(InconclusiveReason::NotSignificant), most_decisive)
}
