//! Types for model routing.

use crate::ab_testing::VariantAssignment;
use crate::error::{MeridianError, Result};
use crate::types::{Evidence, ReferenceRequest, RoutingStrategy, TaskType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Weights for the balanced strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingWeights {
    /// Weight for expected quality.
    pub quality: f64,
    /// Weight for expected cost (cheaper is better).
    pub cost: f64,
    /// Weight for expected latency (faster is better).
    pub latency: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self { quality: 0.5, cost: 0.3, latency: 0.2 }
    }
}

impl RoutingWeights {
    /// Each weight must be non-negative and together they must sum to 1.
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [("quality", self.quality), ("cost", self.cost), ("latency", self.latency)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(MeridianError::Validation(format!(
                    "Invalid {} weight: {} (must be >= 0.0)",
                    name, weight
                )));
            }
        }
        let sum = self.quality + self.cost + self.latency;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MeridianError::Validation(format!("Routing weights must sum to 1.0, got {sum}")));
        }
        Ok(())
    }
}

/// Router tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Strategy used when a request does not name one.
    pub default_strategy: RoutingStrategy,
    /// Balanced-strategy weights.
    pub weights: RoutingWeights,
    /// Trailing window for routing-relevant stats.
    pub stats_window: chrono::Duration,
    /// Maximum number of candidates in a fallback plan.
    pub max_fallback_depth: usize,
    /// Records a model needs in the window before history replaces its priors.
    pub min_history_samples: usize,
    /// How long cached stats may be served. Zero disables the cache.
    pub stats_cache_ttl: Duration,
    /// Request shape used to price models without history.
    pub reference_request: ReferenceRequest,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Balanced,
            weights: RoutingWeights::default(),
            stats_window: chrono::Duration::hours(168),
            max_fallback_depth: 3,
            min_history_samples: 1,
            stats_cache_ttl: Duration::from_secs(30),
            reference_request: ReferenceRequest::default(),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if self.stats_window <= chrono::Duration::zero() {
            return Err(MeridianError::Validation("stats_window must be positive".to_string()));
        }
        if self.max_fallback_depth == 0 {
            return Err(MeridianError::Validation("max_fallback_depth must be at least 1".to_string()));
        }
        if self.min_history_samples == 0 {
            return Err(MeridianError::Validation("min_history_samples must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Hard limits a routed model must satisfy. Unset fields impose nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConstraints {
    /// Minimum expected quality (0-100).
    pub min_quality_score: Option<f64>,
    /// Maximum expected cost per request in USD.
    pub max_cost_per_request: Option<f64>,
    /// Maximum expected latency in milliseconds.
    pub max_latency_ms: Option<f64>,
    /// Minimum context window in tokens.
    pub min_context_tokens: Option<u32>,
    /// Model ids that must not be selected.
    pub exclude_models: Vec<String>,
}

impl RouteConstraints {
    pub fn validate(&self) -> Result<()> {
        if let Some(quality) = self.min_quality_score {
            if !(0.0..=100.0).contains(&quality) {
                return Err(MeridianError::Validation(format!(
                    "min_quality_score must be within 0-100, got {quality}"
                )));
            }
        }
        if let Some(cost) = self.max_cost_per_request {
            if !cost.is_finite() || cost < 0.0 {
                return Err(MeridianError::Validation(format!(
                    "max_cost_per_request must be a non-negative number, got {cost}"
                )));
            }
        }
        if let Some(latency) = self.max_latency_ms {
            if !latency.is_finite() || latency <= 0.0 {
                return Err(MeridianError::Validation(format!(
                    "max_latency_ms must be a positive number, got {latency}"
                )));
            }
        }
        Ok(())
    }

    /// Why `candidate` (with context window `max_context_tokens`) is
    /// ineligible, or `None` if it satisfies every limit.
    pub fn violation(&self, candidate: &Candidate, max_context_tokens: u32) -> Option<String> {
        if self.exclude_models.iter().any(|m| *m == candidate.model_id) {
            return Some("excluded".to_string());
        }
        if let Some(min) = self.min_quality_score {
            if candidate.expected_quality < min {
                return Some(format!("expected quality {:.1} < {min}", candidate.expected_quality));
            }
        }
        if let Some(max) = self.max_cost_per_request {
            if candidate.expected_cost > max {
                return Some(format!("expected cost ${:.6} > ${max}", candidate.expected_cost));
            }
        }
        if let Some(max) = self.max_latency_ms {
            if candidate.expected_latency_ms > max {
                return Some(format!("expected latency {:.0}ms > {max}ms", candidate.expected_latency_ms));
            }
        }
        if let Some(min) = self.min_context_tokens {
            if max_context_tokens < min {
                return Some(format!("context window {max_context_tokens} < {min}"));
            }
        }
        None
    }
}

/// A routing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub task_type: TaskType,
    /// `None` uses the router's default strategy.
    #[serde(default)]
    pub strategy: Option<RoutingStrategy>,
    #[serde(default)]
    pub constraints: RouteConstraints,
    /// Experiment this request takes part in.
    #[serde(default)]
    pub ab_test_id: Option<String>,
    /// Stable key (user, lead, conversation) used for variant assignment.
    #[serde(default)]
    pub request_key: Option<String>,
}

impl RouteRequest {
    #[must_use]
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            strategy: None,
            constraints: RouteConstraints::default(),
            ab_test_id: None,
            request_key: None,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: RouteConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Routes through the experiment `test_id`, bucketing on `request_key`.
    #[must_use]
    pub fn in_experiment(mut self, test_id: impl Into<String>, request_key: impl Into<String>) -> Self {
        self.ab_test_id = Some(test_id.into());
        self.request_key = Some(request_key.into());
        self
    }
}

/// A model with the expectations the router ranked it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub model_id: String,
    pub provider: String,
    /// Expected quality (0-100).
    pub expected_quality: f64,
    pub quality_evidence: Evidence,
    /// Expected cost per request in USD.
    pub expected_cost: f64,
    pub cost_evidence: Evidence,
    pub expected_latency_ms: f64,
    pub latency_evidence: Evidence,
    /// Records in the stats window.
    pub samples: usize,
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Ranked by strategy.
    Ranked,
    /// Assigned by a running A/B test.
    Experiment,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionType::Ranked => write!(f, "ranked"),
            DecisionType::Experiment => write!(f, "experiment"),
        }
    }
}

/// Routing decision with the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model_id: String,
    pub task_type: TaskType,
    pub strategy: RoutingStrategy,
    pub decision_type: DecisionType,
    /// Strategy score the candidate was ranked on; `None` for experiment assignments.
    pub score: Option<f64>,
    /// 1-based position in the ranking; `None` for experiment assignments.
    pub rank: Option<usize>,
    pub candidate: Candidate,
    /// Human-readable explanation.
    pub rationale: String,
    /// Present when an experiment picked the model.
    pub assignment: Option<VariantAssignment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(model_id: &str, quality: f64, cost: f64, latency: f64) -> Candidate {
        Candidate {
            model_id: model_id.to_string(),
            provider: "p".to_string(),
            expected_quality: quality,
            quality_evidence: Evidence::Prior,
            expected_cost: cost,
            cost_evidence: Evidence::Prior,
            expected_latency_ms: latency,
            latency_evidence: Evidence::Prior,
            samples: 0,
        }
    }

    #[test]
    fn test_default_weights_are_valid() {
        RoutingWeights::default().validate().unwrap();
        RouterConfig::default().validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = RoutingWeights { quality: 0.5, cost: 0.5, latency: 0.5 };
        assert!(weights.validate().is_err());
        let negative = RoutingWeights { quality: 1.2, cost: -0.2, latency: 0.0 };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_router_config_rejects_zero_depth() {
        let config = RouterConfig { max_fallback_depth: 0, ..RouterConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_constraint_violations() {
        let c = candidate("m", 80.0, 0.01, 1800.0);
        assert!(RouteConstraints::default().violation(&c, 8_192).is_none());

        let quality = RouteConstraints { min_quality_score: Some(95.0), ..Default::default() };
        assert!(quality.violation(&c, 8_192).unwrap().contains("quality"));

        let cost = RouteConstraints { max_cost_per_request: Some(0.005), ..Default::default() };
        assert!(cost.violation(&c, 8_192).unwrap().contains("cost"));

        let latency = RouteConstraints { max_latency_ms: Some(1000.0), ..Default::default() };
        assert!(latency.violation(&c, 8_192).unwrap().contains("latency"));

        let context = RouteConstraints { min_context_tokens: Some(100_000), ..Default::default() };
        assert!(context.violation(&c, 8_192).unwrap().contains("context"));

        let excluded = RouteConstraints { exclude_models: vec!["m".to_string()], ..Default::default() };
        assert_eq!(excluded.violation(&c, 8_192).as_deref(), Some("excluded"));
    }

    #[test]
    fn test_constraint_validation() {
        assert!(RouteConstraints { min_quality_score: Some(120.0), ..Default::default() }.validate().is_err());
        assert!(RouteConstraints { max_cost_per_request: Some(-1.0), ..Default::default() }.validate().is_err());
        assert!(RouteConstraints { max_latency_ms: Some(0.0), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: RouteRequest = serde_json::from_str(r#"{"task_type":"lead_scoring"}"#).unwrap();
        assert_eq!(request, RouteRequest::new(TaskType::LeadScoring));
    }
}
