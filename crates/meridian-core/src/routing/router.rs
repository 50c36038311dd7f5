//! Model router: strategy ranking over the catalog, enriched with telemetry.

use super::fallback::FallbackPlan;
use super::types::{Candidate, DecisionType, RouteRequest, RouterConfig, RoutingDecision};
use crate::ab_testing::ABTestManager;
use crate::error::{MeridianError, Result, StorageError};
use crate::registry::{ModelDescriptor, ModelRegistry, efficiency};
use crate::tracker::{MetricTracker, ModelStats};
use crate::types::{Evidence, RoutingStrategy, TaskType};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info};

type TaskStats = Arc<BTreeMap<String, ModelStats>>;

/// Stats fetched from the tracker, valid for one write generation.
#[derive(Debug)]
struct StatsCache {
    generation: u64,
    filled_at: Instant,
    by_task: HashMap<TaskType, TaskStats>,
}

fn poisoned(e: impl std::fmt::Display) -> MeridianError {
    StorageError::LockPoisoned(e.to_string()).into()
}

/// Selects a model for a task.
///
/// Routing is a synchronous computation over the catalog snapshot and
/// cached tracker aggregates. It never calls a model.
#[derive(Debug)]
pub struct ModelRouter {
    /// Catalog candidates are drawn from.
    registry: Arc<ModelRegistry>,
    /// Source of historical quality, cost and latency.
    tracker: Arc<MetricTracker>,
    /// Experiments that take priority over ranking.
    experiments: Option<Arc<ABTestManager>>,
    config: RouterConfig,
    cache: RwLock<Option<StatsCache>>,
}

impl ModelRouter {
    /// Creates a router with the default configuration.
    ///
    /// # Arguments
    /// * `registry` - Model catalog
    /// * `tracker` - Execution telemetry used to enrich candidates
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, tracker: Arc<MetricTracker>) -> Self {
        Self { registry, tracker, experiments: None, config: RouterConfig::default(), cache: RwLock::new(None) }
    }

    /// Replaces the configuration.
    ///
    /// # Errors
    /// `Validation` if the weights or limits are unusable.
    pub fn with_config(mut self, config: RouterConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Lets requests that name a running A/B test be routed by it.
    #[must_use]
    pub fn with_experiments(mut self, manager: Arc<ABTestManager>) -> Self {
        self.experiments = Some(manager);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<MetricTracker> {
        &self.tracker
    }

    /// Picks the model for `request`.
    ///
    /// A running experiment named by the request takes priority. Otherwise
    /// every capable model is enriched with recent stats (or its priors),
    /// filtered by the constraints and ranked by the strategy.
    ///
    /// # Errors
    /// `NoEligibleModel` when the constraints leave nothing, `NotFound` for
    /// an unknown test, `Validation` for malformed constraints.
    pub fn route(&self, request: &RouteRequest) -> Result<RoutingDecision> {
        if let Some(decision) = self.experiment_decision(request)? {
            info!(
                task_type = %request.task_type,
                model_id = %decision.model_id,
                decision_type = %decision.decision_type,
                "Routing decision made"
            );
            return Ok(decision);
        }

        let ranked = self.rank(request)?;
        let decision = ranked.into_iter().next().ok_or_else(|| MeridianError::NoEligibleModel {
            task_type: request.task_type,
            reason: "no candidates ranked".to_string(),
        })?;
        info!(
            task_type = %request.task_type,
            strategy = %decision.strategy,
            model_id = %decision.model_id,
            score = ?decision.score,
            decision_type = %decision.decision_type,
            "Routing decision made"
        );
        Ok(decision)
    }

    /// An ordered plan of at most `max_fallback_depth` candidates.
    ///
    /// An experiment assignment, if any, comes first and the ranked
    /// candidates follow it.
    pub fn route_with_fallback(&self, request: &RouteRequest) -> Result<FallbackPlan> {
        let depth = self.config.max_fallback_depth;
        let mut candidates = Vec::with_capacity(depth);
        let assigned = self.experiment_decision(request)?;
        if let Some(decision) = assigned.clone() {
            candidates.push(decision);
        }

        match self.rank(request) {
            Ok(ranked) => candidates.extend(
                ranked.into_iter().filter(|d| assigned.as_ref().is_none_or(|a| a.model_id != d.model_id)),
            ),
            Err(MeridianError::NoEligibleModel { .. }) if assigned.is_some() => {}
            Err(e) => return Err(e),
        }
        candidates.truncate(depth);

        debug!(
            task_type = %request.task_type,
            models = ?candidates.iter().map(|d| d.model_id.as_str()).collect::<Vec<_>>(),
            "Built fallback plan"
        );
        Ok(FallbackPlan::new(request.task_type, candidates))
    }

    /// The top `k` distinct candidates for `task_type` under the default
    /// strategy, for callers that run an ensemble.
    pub fn council(&self, task_type: TaskType, k: usize) -> Result<Vec<RoutingDecision>> {
        self.council_for(&RouteRequest::new(task_type), k)
    }

    /// The top `k` distinct candidates for `request`. Experiments are ignored.
    ///
    /// Returns fewer than `k` when fewer models are eligible.
    pub fn council_for(&self, request: &RouteRequest, k: usize) -> Result<Vec<RoutingDecision>> {
        if k == 0 {
            return Err(MeridianError::Validation("council size must be at least 1".to_string()));
        }
        let mut ranked = self.rank(request)?;
        ranked.truncate(k);
        debug!(task_type = %request.task_type, requested = k, selected = ranked.len(), "Selected council");
        Ok(ranked)
    }

    /// Every eligible candidate, best first.
    ///
    /// # Errors
    /// `NoEligibleModel` if no capable model satisfies the constraints.
    pub fn rank(&self, request: &RouteRequest) -> Result<Vec<RoutingDecision>> {
        request.constraints.validate()?;
        let strategy = request.strategy.unwrap_or(self.config.default_strategy);
        let descriptors = self.registry.list(request.task_type);
        if descriptors.is_empty() {
            return Err(MeridianError::NoEligibleModel {
                task_type: request.task_type,
                reason: "no registered model declares this capability".to_string(),
            });
        }

        let stats = self.stats_for(request.task_type)?;
        let mut rejected = Vec::new();
        let eligible: Vec<Candidate> = descriptors
            .iter()
            .filter_map(|descriptor| {
                let candidate = self.enrich(descriptor, stats.get(&descriptor.id));
                match request.constraints.violation(&candidate, descriptor.max_context_tokens) {
                    Some(reason) => {
                        debug!(model_id = %descriptor.id, reason = %reason, "Candidate filtered out");
                        rejected.push(format!("{} ({reason})", descriptor.id));
                        None
                    }
                    None => Some(candidate),
                }
            })
            .collect();

        if eligible.is_empty() {
            return Err(MeridianError::NoEligibleModel {
                task_type: request.task_type,
                reason: format!("constraints eliminated every candidate: {}", rejected.join(", ")),
            });
        }

        let total = eligible.len();
        Ok(score_candidates(strategy, &self.config, eligible)
            .into_iter()
            .enumerate()
            .map(|(position, (candidate, score))| RoutingDecision {
                model_id: candidate.model_id.clone(),
                task_type: request.task_type,
                strategy,
                decision_type: DecisionType::Ranked,
                score: Some(score),
                rank: Some(position + 1),
                rationale: rationale(strategy, &candidate, score, position + 1, total),
                candidate,
                assignment: None,
            })
            .collect())
    }

    fn experiment_decision(&self, request: &RouteRequest) -> Result<Option<RoutingDecision>> {
        let Some(test_id) = request.ab_test_id.as_deref() else {
            return Ok(None);
        };
        let manager = self.experiments.as_ref().ok_or_else(|| {
            MeridianError::Validation(format!("request names A/B test '{test_id}' but no experiment manager is configured"))
        })?;
        let test = manager.get(test_id)?;
        if test.task_type != request.task_type {
            return Err(MeridianError::Validation(format!(
                "A/B test '{}' is for {}, not {}",
                test_id, test.task_type, request.task_type
            )));
        }
        if !test.is_running() {
            debug!(test_id = %test_id, status = %test.status, "A/B test not running; ranking instead");
            return Ok(None);
        }
        let key = request.request_key.as_deref().ok_or_else(|| {
            MeridianError::Validation(format!("A/B test '{test_id}' requires a request key"))
        })?;

        let assignment = manager.assign_variant(test_id, key)?;
        let descriptor = self.registry.get(&assignment.model_id)?;
        if !descriptor.supports(request.task_type) {
            return Err(MeridianError::Validation(format!(
                "variant '{}' of A/B test '{}' no longer declares capability for {}",
                descriptor.id, test_id, request.task_type
            )));
        }
        let stats = self.stats_for(request.task_type)?;
        let candidate = self.enrich(&descriptor, stats.get(&descriptor.id));

        Ok(Some(RoutingDecision {
            model_id: descriptor.id.clone(),
            task_type: request.task_type,
            strategy: request.strategy.unwrap_or(self.config.default_strategy),
            decision_type: DecisionType::Experiment,
            score: None,
            rank: None,
            rationale: format!(
                "A/B test '{}' assigned bucket {} to variant '{}'",
                test_id, assignment.bucket, assignment.model_id
            ),
            candidate,
            assignment: Some(assignment),
        }))
    }

    /// Expected quality, cost and latency, from history when the window has
    /// enough records and from the descriptor otherwise.
    fn enrich(&self, descriptor: &ModelDescriptor, stats: Option<&ModelStats>) -> Candidate {
        let min_samples = self.config.min_history_samples;
        let with_history = stats.filter(|s| s.total >= min_samples);

        let (expected_quality, quality_evidence) =
            match stats.filter(|s| s.quality_samples >= min_samples).and_then(|s| s.mean_quality) {
                Some(quality) => (quality, Evidence::History),
                None => (descriptor.quality_prior, Evidence::Prior),
            };
        let (expected_cost, cost_evidence) = match with_history {
            Some(s) => (s.mean_cost, Evidence::History),
            None => {
                let reference = self.config.reference_request;
                (
                    descriptor.estimate_cost(u64::from(reference.input_tokens), u64::from(reference.output_tokens)),
                    Evidence::Prior,
                )
            }
        };
        let (expected_latency_ms, latency_evidence) = match with_history {
            Some(s) => (s.mean_latency_ms, Evidence::History),
            None => (descriptor.latency_class.nominal_ms(), Evidence::Prior),
        };

        Candidate {
            model_id: descriptor.id.clone(),
            provider: descriptor.provider.clone(),
            expected_quality,
            quality_evidence,
            expected_cost,
            cost_evidence,
            expected_latency_ms,
            latency_evidence,
            samples: stats.map_or(0, |s| s.total),
        }
    }

    /// Stats for every model on `task_type`, served from the cache while no
    /// new record has been written and the TTL has not elapsed.
    fn stats_for(&self, task_type: TaskType) -> Result<TaskStats> {
        let ttl = self.config.stats_cache_ttl;
        if ttl.is_zero() {
            return Ok(Arc::new(self.tracker.task_stats(task_type, self.config.stats_window)?));
        }

        let generation = self.tracker.generation();
        let fresh = |cache: &StatsCache| cache.generation == generation && cache.filled_at.elapsed() < ttl;
        {
            let cache = self.cache.read().map_err(poisoned)?;
            if let Some(stats) = cache.as_ref().filter(|&c| fresh(c)).and_then(|c| c.by_task.get(&task_type)) {
                return Ok(Arc::clone(stats));
            }
        }

        let stats: TaskStats = Arc::new(self.tracker.task_stats(task_type, self.config.stats_window)?);
        let mut cache = self.cache.write().map_err(poisoned)?;
        if !cache.as_ref().is_some_and(|c| fresh(c)) {
            *cache = Some(StatsCache { generation, filled_at: Instant::now(), by_task: HashMap::new() });
        }
        if let Some(cache) = cache.as_mut() {
            cache.by_task.insert(task_type, Arc::clone(&stats));
        }
        Ok(stats)
    }
}

/// Normalizes `value` into 0..=1 over `[min, max]`, where 1 is best.
/// A degenerate range scores every candidate 1.
fn normalized_lower_is_better(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() <= f64::EPSILON {
        1.0
    } else {
        (max - value) / (max - min)
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Scores and sorts `candidates` for `strategy`. Ties fall back to higher
/// quality and then model id, so the order is deterministic.
fn score_candidates(
    strategy: RoutingStrategy,
    config: &RouterConfig,
    candidates: Vec<Candidate>,
) -> Vec<(Candidate, f64)> {
    let (min_cost, max_cost) = bounds(candidates.iter().map(|c| c.expected_cost));
    let (min_latency, max_latency) = bounds(candidates.iter().map(|c| c.expected_latency_ms));
    let weights = config.weights;

    let mut scored: Vec<(Candidate, f64)> = candidates
        .into_iter()
        .map(|candidate| {
            let score = match strategy {
                RoutingStrategy::BestQuality => candidate.expected_quality,
                RoutingStrategy::BestCost => efficiency(candidate.expected_quality, candidate.expected_cost),
                RoutingStrategy::Fastest => candidate.expected_latency_ms,
                RoutingStrategy::Balanced => {
                    weights.quality * (candidate.expected_quality / 100.0)
                        + weights.cost * normalized_lower_is_better(candidate.expected_cost, min_cost, max_cost)
                        + weights.latency
                            * normalized_lower_is_better(candidate.expected_latency_ms, min_latency, max_latency)
                }
            };
            (candidate, score)
        })
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        let primary = match strategy {
            RoutingStrategy::Fastest => sa.total_cmp(sb),
            _ => sb.total_cmp(sa),
        };
        let secondary = match strategy {
            RoutingStrategy::BestQuality => a.expected_cost.total_cmp(&b.expected_cost),
            _ => b.expected_quality.total_cmp(&a.expected_quality),
        };
        primary.then(secondary).then_with(|| a.model_id.cmp(&b.model_id))
    });
    scored
}

fn rationale(strategy: RoutingStrategy, candidate: &Candidate, score: f64, rank: usize, total: usize) -> String {
    let score = match strategy {
        RoutingStrategy::BestQuality => format!("expected quality {score:.1}"),
        RoutingStrategy::BestCost => format!("quality per dollar {score:.1}"),
        RoutingStrategy::Fastest => format!("expected latency {score:.0}ms"),
        RoutingStrategy::Balanced => format!("balanced score {score:.3}"),
    };
    format!(
        "{strategy}: ranked {rank} of {total} by {score}; quality {:.1} ({}), cost ${:.6}/request ({}), latency {:.0}ms ({}), {} sample(s) in window",
        candidate.expected_quality,
        candidate.quality_evidence,
        candidate.expected_cost,
        candidate.cost_evidence,
        candidate.expected_latency_ms,
        candidate.latency_evidence,
        candidate.samples,
    )
}
