//! Model routing.
//!
//! The router turns a task type, a strategy and a set of constraints into a
//! model id. Candidates come from the registry, are enriched with recent
//! tracker aggregates (or the descriptor's priors when there is no history),
//! filtered by the constraints and ranked. A request that names a running
//! A/B test is routed by the test's variant assignment instead.

mod fallback;
mod router;
mod types;

pub use fallback::FallbackPlan;
pub use router::ModelRouter;
pub use types::{
    Candidate, DecisionType, RouteConstraints, RouteRequest, RouterConfig, RoutingDecision, RoutingWeights,
};
