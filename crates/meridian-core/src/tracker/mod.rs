//! Execution telemetry: recording outcomes and aggregating them.
//!
//! The tracker is append-only. `record_execution` validates an outcome,
//! prices it from the registry, optionally scores it, and appends it to a
//! [`RecordStore`]. Every read aggregates raw records at call time, so
//! concurrent writers never race on shared counters.
//!
//! A write generation counter lets readers such as the router cache
//! aggregates and invalidate them on the next write.

mod record;
mod stats;
pub mod store;

use crate::error::{EntityKind, MeridianError, Result};
use crate::quality::QualityScorer;
use crate::registry::ModelRegistry;
use crate::types::{Evidence, ReferenceRequest, TaskType};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use store::{InMemoryRecordStore, RecordQuery, RecordStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use record::{ExecutionOutcome, ExecutionRecord, UserFeedback};
pub use stats::{
    ComparisonEntry, CostAnalysis, CostRecommendation, ModelComparison, ModelStats, mean, percentile,
};

/// Records execution outcomes and serves aggregates over trailing windows.
pub struct MetricTracker {
    store: Arc<dyn RecordStore>,
    registry: Arc<ModelRegistry>,
    scorer: Option<QualityScorer>,
    reference: ReferenceRequest,
    generation: AtomicU64,
}

impl std::fmt::Debug for MetricTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricTracker")
            .field("auto_score", &self.scorer.is_some())
            .field("reference", &self.reference)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

fn reject(message: String) -> MeridianError {
    warn!(reason = %message, "Rejected execution record");
    MeridianError::Validation(message)
}

fn validate_window(window: Duration) -> Result<()> {
    if window <= Duration::zero() {
        return Err(MeridianError::Validation(format!(
            "window must be positive, got {}s",
            window.num_seconds()
        )));
    }
    Ok(())
}

impl MetricTracker {
    /// Creates a tracker over `store` with auto-scoring enabled.
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            store,
            registry,
            scorer: Some(QualityScorer::new()),
            reference: ReferenceRequest::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Creates a tracker over a fresh in-memory store.
    pub fn in_memory(registry: Arc<ModelRegistry>) -> Self {
        Self::new(Arc::new(InMemoryRecordStore::new()), registry)
    }

    /// Disables scoring of raw outputs attached to outcomes.
    #[must_use]
    pub fn without_auto_scoring(mut self) -> Self {
        self.scorer = None;
        self
    }

    /// Sets the request shape used to price models that have no history.
    #[must_use]
    pub fn with_reference_request(mut self, reference: ReferenceRequest) -> Self {
        self.reference = reference;
        self
    }

    /// The registry records are priced against.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Incremented on every successful write.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Validates, prices and appends one execution outcome.
    ///
    /// Cost is always recomputed from the token counts and the model's
    /// pricing. A caller-reported cost is only sanity-checked. On any
    /// validation failure nothing is stored.
    ///
    /// # Errors
    /// `Validation` for malformed input, `NotFound` for an unknown model and
    /// `Storage` if the append fails.
    pub fn record_execution(&self, outcome: ExecutionOutcome) -> Result<ExecutionRecord> {
        if outcome.model_id.trim().is_empty() {
            return Err(reject("model_id must not be empty".to_string()));
        }
        if let Some(cost) = outcome.reported_cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(reject(format!("cost must be a non-negative number, got {cost}")));
            }
        }
        if !outcome.latency_ms.is_finite() || outcome.latency_ms < 0.0 {
            return Err(reject(format!("latency must be a non-negative number, got {}", outcome.latency_ms)));
        }
        if let Some(quality) = outcome.quality_score {
            if !(0.0..=100.0).contains(&quality) {
                return Err(reject(format!("quality score must be within 0-100, got {quality}")));
            }
            if outcome.error.is_some() {
                return Err(reject("failed executions cannot carry a quality score".to_string()));
            }
        }
        if let Some(variant) = &outcome.variant {
            if outcome.ab_test_id.is_none() {
                return Err(reject("variant requires an ab_test_id".to_string()));
            }
            // Variants are model ids; results are bucketed by this tag.
            if *variant != outcome.model_id {
                return Err(reject(format!(
                    "variant '{}' must equal model_id '{}'",
                    variant, outcome.model_id
                )));
            }
        }

        let descriptor = self.registry.get(&outcome.model_id).inspect_err(|e| {
            warn!(model_id = %outcome.model_id, error = %e, "Rejected execution record");
        })?;
        if !descriptor.supports(outcome.task_type) {
            return Err(reject(format!(
                "model '{}' does not declare capability for {}",
                outcome.model_id, outcome.task_type
            )));
        }

        let cost = descriptor.estimate_cost(u64::from(outcome.input_tokens), u64::from(outcome.output_tokens));
        if let Some(reported) = outcome.reported_cost {
            if (reported - cost).abs() > 1e-9 {
                debug!(
                    model_id = %outcome.model_id,
                    reported_cost = reported,
                    computed_cost = cost,
                    "Reported cost differs from catalog pricing; keeping computed cost"
                );
            }
        }

        let quality_score = match (outcome.quality_score, &outcome.output, &self.scorer) {
            (Some(score), _, _) => Some(score),
            (None, Some(output), Some(scorer)) if outcome.error.is_none() && scorer.supports(outcome.task_type) => {
                let context = outcome.scoring_context.clone().unwrap_or_default();
                Some(scorer.score(outcome.task_type, output, &context)?.score)
            }
            _ => None,
        };

        let variant = match (&outcome.ab_test_id, outcome.variant) {
            (Some(_), None) => Some(outcome.model_id.clone()),
            (_, variant) => variant,
        };

        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            model_id: outcome.model_id,
            task_type: outcome.task_type,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            cost,
            latency_ms: outcome.latency_ms,
            quality_score,
            feedback: None,
            error: outcome.error,
            timestamp: outcome.timestamp.unwrap_or_else(Utc::now),
            ab_test_id: outcome.ab_test_id,
            variant,
        };

        self.store.append(&record).inspect_err(|e| {
            warn!(model_id = %record.model_id, error = %e, "Failed to persist execution record");
        })?;
        self.generation.fetch_add(1, Ordering::AcqRel);

        debug!(
            execution_id = %record.id,
            model_id = %record.model_id,
            task_type = %record.task_type,
            cost = record.cost,
            latency_ms = record.latency_ms,
            quality = ?record.quality_score,
            "Recorded execution"
        );
        Ok(record)
    }

    /// Attaches feedback to an execution. Later feedback supersedes earlier.
    ///
    /// # Errors
    /// `Validation` for a rating outside 1-5, `NotFound` for an unknown execution.
    pub fn record_feedback(&self, execution_id: Uuid, feedback: UserFeedback) -> Result<()> {
        if !(1..=5).contains(&feedback.rating) {
            return Err(reject(format!("rating must be within 1-5, got {}", feedback.rating)));
        }
        if !self.store.append_feedback(execution_id, &feedback)? {
            return Err(MeridianError::not_found(EntityKind::Execution, execution_id.to_string()));
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(execution_id = %execution_id, rating = feedback.rating, "Recorded feedback");
        Ok(())
    }

    /// One execution with its latest feedback.
    pub fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionRecord> {
        self.store
            .get(execution_id)?
            .ok_or_else(|| MeridianError::not_found(EntityKind::Execution, execution_id.to_string()))
    }

    /// Aggregate for `model_id` on `task_type` over the trailing `window`.
    ///
    /// Returns `Ok(None)` when the window holds no records for the pair.
    ///
    /// # Errors
    /// `NotFound` for an unknown model, `Validation` for a non-positive window.
    pub fn get_stats(&self, model_id: &str, task_type: TaskType, window: Duration) -> Result<Option<ModelStats>> {
        validate_window(window)?;
        self.registry.get(model_id)?;
        let now = Utc::now();
        self.stats_between(model_id, task_type, now - window, now)
    }

    /// Aggregate over an explicit, inclusive time range.
    pub fn stats_between(
        &self,
        model_id: &str,
        task_type: TaskType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<ModelStats>> {
        let query = RecordQuery::new().model(model_id).task(task_type).since(since).until(until);
        let records = self.store.query(&query)?;
        Ok(ModelStats::from_records(model_id, task_type, &records))
    }

    /// Stats for every model with records for `task_type` in the window, keyed by model id.
    pub fn task_stats(&self, task_type: TaskType, window: Duration) -> Result<BTreeMap<String, ModelStats>> {
        validate_window(window)?;
        let records = self.store.query(&RecordQuery::new().task(task_type).since(Utc::now() - window))?;
        let models: HashSet<&str> = records.iter().map(|r| r.model_id.as_str()).collect();
        Ok(models
            .into_iter()
            .filter_map(|model| ModelStats::from_records(model, task_type, &records))
            .map(|stats| (stats.model_id.clone(), stats))
            .collect())
    }

    /// Side-by-side stats for `model_ids` on `task_type`, ranked by mean
    /// quality (descending), then mean cost (ascending), then id.
    ///
    /// # Errors
    /// `Validation` for an empty id list, `NotFound` for an unknown model.
    pub fn compare(&self, task_type: TaskType, model_ids: &[String], window: Duration) -> Result<ModelComparison> {
        if model_ids.is_empty() {
            return Err(MeridianError::Validation("compare needs at least one model id".to_string()));
        }
        validate_window(window)?;
        for model_id in model_ids {
            self.registry.get(model_id)?;
        }

        let by_model = self.task_stats(task_type, window)?;
        let mut seen = HashSet::new();
        let (mut ranked, unranked): (Vec<ComparisonEntry>, Vec<ComparisonEntry>) = model_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| ComparisonEntry { model_id: id.clone(), rank: None, stats: by_model.get(id).cloned() })
            .partition(|entry| entry.stats.is_some());

        ranked.sort_by(|a, b| {
            let (Some(sa), Some(sb)) = (&a.stats, &b.stats) else { return std::cmp::Ordering::Equal };
            let qa = sa.mean_quality.unwrap_or(f64::NEG_INFINITY);
            let qb = sb.mean_quality.unwrap_or(f64::NEG_INFINITY);
            qb.total_cmp(&qa)
                .then_with(|| sa.mean_cost.total_cmp(&sb.mean_cost))
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        for (position, entry) in ranked.iter_mut().enumerate() {
            entry.rank = Some(position + 1);
        }
        ranked.extend(unranked);

        Ok(ModelComparison { task_type, entries: ranked })
    }

    /// Potential savings from moving `task_type` traffic to the cheapest
    /// model expected to reach `min_quality`.
    ///
    /// Expected quality comes from history when a model has scored records
    /// in the window, otherwise from its prior. Expected cost comes from
    /// history when available, otherwise from list price at the task's mean
    /// token shape (or the reference request when the task has no history).
    pub fn cost_analysis(&self, task_type: TaskType, window: Duration, min_quality: f64) -> Result<CostAnalysis> {
        validate_window(window)?;
        if !(0.0..=100.0).contains(&min_quality) {
            return Err(MeridianError::Validation(format!("min_quality must be within 0-100, got {min_quality}")));
        }

        let records = self.store.query(&RecordQuery::new().task(task_type).since(Utc::now() - window))?;
        let executions = records.len();
        let current_avg_cost = mean(&records.iter().map(|r| r.cost).collect::<Vec<_>>());
        let (input_tokens, output_tokens) = if records.is_empty() {
            (u64::from(self.reference.input_tokens), u64::from(self.reference.output_tokens))
        } else {
            let n = executions as f64;
            (
                (records.iter().map(|r| f64::from(r.input_tokens)).sum::<f64>() / n).round() as u64,
                (records.iter().map(|r| f64::from(r.output_tokens)).sum::<f64>() / n).round() as u64,
            )
        };

        let recommendation = self
            .registry
            .list(task_type)
            .iter()
            .filter_map(|descriptor| {
                let stats = ModelStats::from_records(&descriptor.id, task_type, &records);
                let (expected_quality, quality_evidence) = match stats.as_ref().and_then(|s| s.mean_quality) {
                    Some(quality) => (quality, Evidence::History),
                    None => (descriptor.quality_prior, Evidence::Prior),
                };
                let (expected_cost_per_request, cost_evidence) = match &stats {
                    Some(s) => (s.mean_cost, Evidence::History),
                    None => (descriptor.estimate_cost(input_tokens, output_tokens), Evidence::Prior),
                };
                (expected_quality >= min_quality).then(|| CostRecommendation {
                    model_id: descriptor.id.clone(),
                    expected_quality,
                    quality_evidence,
                    expected_cost_per_request,
                    cost_evidence,
                })
            })
            .min_by(|a, b| {
                a.expected_cost_per_request
                    .total_cmp(&b.expected_cost_per_request)
                    .then_with(|| b.expected_quality.total_cmp(&a.expected_quality))
                    .then_with(|| a.model_id.cmp(&b.model_id))
            });

        let savings_per_request = match (current_avg_cost, &recommendation) {
            (Some(current), Some(best)) => Some((current - best.expected_cost_per_request).max(0.0)),
            _ => None,
        };
        let analysis = CostAnalysis {
            task_type,
            executions,
            current_avg_cost,
            min_quality,
            projected_savings: savings_per_request.map(|s| s * executions as f64),
            savings_per_request,
            recommendation,
        };
        info!(
            task_type = %task_type,
            executions,
            recommended = ?analysis.recommendation.as_ref().map(|r| r.model_id.as_str()),
            savings_per_request = ?analysis.savings_per_request,
            "Cost analysis complete"
        );
        Ok(analysis)
    }

    /// Every record tagged with `test_id`, oldest first.
    pub fn records_for_test(&self, test_id: &str) -> Result<Vec<ExecutionRecord>> {
        Ok(self.store.query(&RecordQuery::new().ab_test(test_id))?)
    }
}
