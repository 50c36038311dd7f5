//! Ordered fallback over routed candidates.
//!
//! A plan is owned by one request. The caller executes `current()`, and on a
//! provider failure calls `advance` with the error to get the next candidate.
//! Nothing is retried implicitly.

use super::types::RoutingDecision;
use crate::error::{FailureRecord, MeridianError, Result};
use crate::types::TaskType;
use meridian_abstraction::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Candidates to try in order, plus the failures seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPlan {
    task_type: TaskType,
    candidates: Vec<RoutingDecision>,
    position: usize,
    failures: Vec<FailureRecord>,
}

impl FallbackPlan {
    pub(crate) fn new(task_type: TaskType, candidates: Vec<RoutingDecision>) -> Self {
        Self { task_type, candidates, position: 0, failures: Vec::new() }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Every candidate in the plan, in order.
    pub fn candidates(&self) -> &[RoutingDecision] {
        &self.candidates
    }

    /// The candidate to execute next; `None` once the plan is exhausted.
    pub fn current(&self) -> Option<&RoutingDecision> {
        self.candidates.get(self.position)
    }

    /// Candidates not yet tried, the current one included.
    pub fn remaining(&self) -> usize {
        self.candidates.len().saturating_sub(self.position)
    }

    /// Failures recorded so far, oldest first.
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Records that `failed_model` failed with `error` and moves to the next
    /// candidate.
    ///
    /// # Errors
    /// `Provider` carrying every recorded failure once no candidate is left.
    /// `Validation` if `failed_model` is not the current candidate.
    pub fn advance(&mut self, failed_model: &str, error: ProviderError) -> Result<&RoutingDecision> {
        match self.current() {
            Some(current) if current.model_id == failed_model => {}
            Some(current) => {
                return Err(MeridianError::Validation(format!(
                    "fallback plan is at '{}', not '{}'",
                    current.model_id, failed_model
                )));
            }
            None => {
                return Err(MeridianError::Validation("fallback plan is already exhausted".to_string()));
            }
        }

        self.failures.push(FailureRecord { model_id: failed_model.to_string(), error: error.clone() });
        self.position += 1;

        match self.candidates.get(self.position) {
            Some(next) => {
                warn!(
                    task_type = %self.task_type,
                    failed_model = %failed_model,
                    next_model = %next.model_id,
                    error = %error,
                    "Advancing to fallback model"
                );
                Ok(next)
            }
            None => {
                warn!(
                    task_type = %self.task_type,
                    attempts = self.failures.len(),
                    error = %error,
                    "All fallback models failed"
                );
                Err(MeridianError::Provider { failures: self.failures.clone(), source: error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::{Candidate, DecisionType};
    use crate::types::{Evidence, RoutingStrategy};

    fn decision(model_id: &str) -> RoutingDecision {
        RoutingDecision {
            model_id: model_id.to_string(),
            task_type: TaskType::Summarization,
            strategy: RoutingStrategy::Balanced,
            decision_type: DecisionType::Ranked,
            score: Some(0.5),
            rank: Some(1),
            candidate: Candidate {
                model_id: model_id.to_string(),
                provider: "p".to_string(),
                expected_quality: 80.0,
                quality_evidence: Evidence::Prior,
                expected_cost: 0.001,
                cost_evidence: Evidence::Prior,
                expected_latency_ms: 600.0,
                latency_evidence: Evidence::Prior,
                samples: 0,
            },
            rationale: String::new(),
            assignment: None,
        }
    }

    fn plan() -> FallbackPlan {
        FallbackPlan::new(TaskType::Summarization, vec![decision("a"), decision("b"), decision("c")])
    }

    #[test]
    fn test_advance_walks_candidates_in_order() {
        let mut plan = plan();
        assert_eq!(plan.current().unwrap().model_id, "a");
        assert_eq!(plan.remaining(), 3);

        let next = plan.advance("a", ProviderError::Request("reset".to_string())).unwrap();
        assert_eq!(next.model_id, "b");
        assert_eq!(plan.remaining(), 2);
        assert_eq!(plan.failures().len(), 1);
    }

    #[test]
    fn test_exhaustion_reports_every_failure() {
        let mut plan = plan();
        plan.advance("a", ProviderError::Request("reset".to_string())).unwrap();
        plan.advance("b", ProviderError::Timeout { model_id: "b".to_string(), timeout_ms: 500 }).unwrap();
        let err = plan.advance("c", ProviderError::Unavailable("c".to_string())).unwrap_err();

        let MeridianError::Provider { failures, source } = err else { panic!("expected provider error") };
        let failed: Vec<&str> = failures.iter().map(|f| f.model_id.as_str()).collect();
        assert_eq!(failed, vec!["a", "b", "c"]);
        assert_eq!(source, ProviderError::Unavailable("c".to_string()));
        assert!(plan.current().is_none());

        assert!(matches!(
            plan.advance("c", ProviderError::Request("again".to_string())),
            Err(MeridianError::Validation(_))
        ));
    }

    #[test]
    fn test_advance_rejects_out_of_order_model() {
        let mut plan = plan();
        let err = plan.advance("b", ProviderError::Request("reset".to_string())).unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
        assert_eq!(plan.current().unwrap().model_id, "a");
        assert!(plan.failures().is_empty());
    }
}
