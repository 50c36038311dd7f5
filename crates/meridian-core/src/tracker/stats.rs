//! Aggregates derived from execution records.
//!
//! Nothing here is stored. Every figure is recomputed from the records in a
//! window, so a [`ModelStats`] always equals the aggregate of the records it
//! was built from.

use super::record::ExecutionRecord;
use crate::types::{Evidence, TaskType};
use serde::{Deserialize, Serialize};

/// Aggregate performance of one model on one task over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model_id: String,
    pub task_type: TaskType,
    /// All executions in the window.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean cost per execution in USD, failures included.
    pub mean_cost: f64,
    pub total_cost: f64,
    pub mean_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Mean quality over scored successful executions.
    pub mean_quality: Option<f64>,
    pub quality_samples: usize,
    /// Mean feedback rating (1-5) over executions that received feedback.
    pub mean_rating: Option<f64>,
    pub rating_samples: usize,
    pub mean_input_tokens: f64,
    pub mean_output_tokens: f64,
}

impl ModelStats {
    /// Aggregates the records that belong to `model_id` and `task_type`.
    ///
    /// Returns `None` when no record matches, so callers never divide by zero.
    pub fn from_records<'a>(
        model_id: &str,
        task_type: TaskType,
        records: impl IntoIterator<Item = &'a ExecutionRecord>,
    ) -> Option<Self> {
        let matching: Vec<&ExecutionRecord> = records
            .into_iter()
            .filter(|r| r.model_id == model_id && r.task_type == task_type)
            .collect();
        if matching.is_empty() {
            return None;
        }

        let total = matching.len();
        let succeeded = matching.iter().filter(|r| r.succeeded()).count();
        let total_cost: f64 = matching.iter().map(|r| r.cost).sum();

        let mut latencies: Vec<f64> = matching.iter().map(|r| r.latency_ms).collect();
        latencies.sort_by(f64::total_cmp);

        let qualities: Vec<f64> =
            matching.iter().filter(|r| r.succeeded()).filter_map(|r| r.quality_score).collect();
        let ratings: Vec<f64> =
            matching.iter().filter_map(|r| r.feedback.as_ref()).map(|f| f64::from(f.rating)).collect();

        Some(Self {
            model_id: model_id.to_string(),
            task_type,
            total,
            succeeded,
            failed: total - succeeded,
            mean_cost: total_cost / total as f64,
            total_cost,
            mean_latency_ms: mean(&latencies).unwrap_or(0.0),
            p50_latency_ms: percentile(&latencies, 50.0).unwrap_or(0.0),
            p95_latency_ms: percentile(&latencies, 95.0).unwrap_or(0.0),
            p99_latency_ms: percentile(&latencies, 99.0).unwrap_or(0.0),
            mean_quality: mean(&qualities),
            quality_samples: qualities.len(),
            mean_rating: mean(&ratings),
            rating_samples: ratings.len(),
            mean_input_tokens: matching.iter().map(|r| f64::from(r.input_tokens)).sum::<f64>() / total as f64,
            mean_output_tokens: matching.iter().map(|r| f64::from(r.output_tokens)).sum::<f64>() / total as f64,
        })
    }

    /// Share of executions that succeeded, 0-1.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.succeeded as f64 / self.total as f64 }
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Percentile of already sorted values, linearly interpolated between the
/// closest ranks. `pct` is clamped to 0-100.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let fraction = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
        }
    }
}

/// One row of a model comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub model_id: String,
    /// 1-based position; `None` when the model has no data in the window.
    pub rank: Option<usize>,
    pub stats: Option<ModelStats>,
}

/// Side-by-side stats for several models on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub task_type: TaskType,
    /// Ranked entries first, then models without data in request order.
    pub entries: Vec<ComparisonEntry>,
}

impl ModelComparison {
    /// The top-ranked model, if any model has data.
    pub fn leader(&self) -> Option<&ComparisonEntry> {
        self.entries.first().filter(|e| e.rank.is_some())
    }
}

/// Cheapest model expected to clear a quality bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecommendation {
    pub model_id: String,
    pub expected_quality: f64,
    pub quality_evidence: Evidence,
    pub expected_cost_per_request: f64,
    pub cost_evidence: Evidence,
}

/// Gap between what a task currently costs and what it could cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub task_type: TaskType,
    /// Executions in the window.
    pub executions: usize,
    /// Mean cost per execution across all models; `None` without data.
    pub current_avg_cost: Option<f64>,
    pub min_quality: f64,
    /// `None` when no model is expected to reach `min_quality`.
    pub recommendation: Option<CostRecommendation>,
    /// Never negative.
    pub savings_per_request: Option<f64>,
    /// `savings_per_request` times the executions in the window.
    pub projected_savings: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::record::UserFeedback;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(model: &str, cost: f64, latency_ms: f64, quality: Option<f64>) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            model_id: model.to_string(),
            task_type: TaskType::EmailGeneration,
            input_tokens: 100,
            output_tokens: 50,
            cost,
            latency_ms,
            quality_score: quality,
            feedback: None,
            error: None,
            timestamp: Utc::now(),
            ab_test_id: None,
            variant: None,
        }
    }

    #[test]
    fn test_stats_match_hand_computed_values() {
        let records = vec![
            record("m", 0.01, 100.0, Some(80.0)),
            record("m", 0.02, 200.0, Some(90.0)),
            record("m", 0.03, 300.0, None),
            record("m", 0.04, 400.0, Some(70.0)),
            record("other", 9.0, 9999.0, Some(1.0)),
        ];
        let stats = ModelStats::from_records("m", TaskType::EmailGeneration, &records).unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.succeeded, 4);
        assert!((stats.mean_cost - 0.025).abs() < 1e-12);
        assert!((stats.total_cost - 0.10).abs() < 1e-12);
        assert!((stats.mean_latency_ms - 250.0).abs() < 1e-9);
        // rank = 0.5 * 3 = 1.5 -> 200 + 0.5 * 100
        assert!((stats.p50_latency_ms - 250.0).abs() < 1e-9);
        // rank = 0.95 * 3 = 2.85 -> 300 + 0.85 * 100
        assert!((stats.p95_latency_ms - 385.0).abs() < 1e-9);
        assert!((stats.p99_latency_ms - 397.0).abs() < 1e-9);
        assert_eq!(stats.quality_samples, 3);
        assert!((stats.mean_quality.unwrap() - 80.0).abs() < 1e-9);
        assert!(stats.mean_rating.is_none());
    }

    #[test]
    fn test_failures_counted_but_not_scored() {
        let mut failed = record("m", 0.01, 50.0, Some(99.0));
        failed.error = Some("timeout".to_string());
        let records = vec![failed, record("m", 0.01, 150.0, Some(60.0))];
        let stats = ModelStats::from_records("m", TaskType::EmailGeneration, &records).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.mean_quality, Some(60.0));
        assert!((stats.success_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_matching_records_is_none() {
        let records = vec![record("m", 0.01, 100.0, None)];
        assert!(ModelStats::from_records("m", TaskType::Summarization, &records).is_none());
        assert!(ModelStats::from_records("x", TaskType::EmailGeneration, &records).is_none());
    }

    #[test]
    fn test_mean_rating_uses_feedback() {
        let mut rated = record("m", 0.0, 10.0, None);
        rated.feedback = Some(UserFeedback::new(4, None));
        let mut rated_low = record("m", 0.0, 10.0, None);
        rated_low.feedback = Some(UserFeedback::new(1, Some("off tone".to_string())));
        let records = vec![rated, rated_low, record("m", 0.0, 10.0, None)];
        let stats = ModelStats::from_records("m", TaskType::EmailGeneration, &records).unwrap();
        assert_eq!(stats.rating_samples, 2);
        assert_eq!(stats.mean_rating, Some(2.5));
    }

    #[test]
    fn test_percentile_edges() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
        assert_eq!(percentile(&[1.0, 2.0], 0.0), Some(1.0));
        assert_eq!(percentile(&[1.0, 2.0], 100.0), Some(2.0));
        assert_eq!(percentile(&[1.0, 2.0], 250.0), Some(2.0));
    }
}
