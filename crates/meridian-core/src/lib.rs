//! Model selection core for Meridian.
//!
//! Picks among interchangeable LLM backends for a task, records how each
//! invocation went, and feeds that history back into later decisions and
//! into controlled experiments.
//!
//! The pieces, leaves first:
//!
//! - [`registry`]: immutable catalog of model descriptors, swapped atomically on reload.
//! - [`quality`]: pure heuristic scoring of an output per task type.
//! - [`tracker`]: append-only execution records and read-time aggregates.
//! - [`ab_testing`]: experiment lifecycle, deterministic variant assignment
//!   and significance testing.
//! - [`routing`]: strategy ranking, fallback plans and k-of-n councils.
//!
//! Nothing here performs inference. Callers execute the routed model through
//! a [`meridian_abstraction::ModelExecutor`] and report back to the tracker.

pub mod ab_testing;
pub mod config;
pub mod error;
pub mod quality;
pub mod registry;
pub mod routing;
pub mod tracker;
pub mod types;

pub use ab_testing::{
    ABTestConfig, ABTestManager, ABTestResult, ExperimentSettings, InconclusiveReason, TestOutcome, TestStatus,
    VariantAssignment, VariantComparison, VariantConfig, VariantResult,
};
pub use config::{ConfigError, ConfigLoader, MeridianConfig, StoreKind};
pub use error::{EntityKind, FailureRecord, MeridianError, Result, StorageError};
pub use quality::{DimensionScore, QualityScore, QualityScorer, ScoringContext, ScoringStrategy};
pub use registry::{ModelDescriptor, ModelRegistry, cost_efficiency};
pub use routing::{
    Candidate, DecisionType, FallbackPlan, ModelRouter, RouteConstraints, RouteRequest, RouterConfig,
    RoutingDecision, RoutingWeights,
};
pub use tracker::store::{InMemoryRecordStore, RecordQuery, RecordStore, SqliteRecordStore};
pub use tracker::{
    CostAnalysis, ExecutionOutcome, ExecutionRecord, MetricTracker, ModelComparison, ModelStats, UserFeedback,
};
pub use types::{Evidence, LatencyClass, ReferenceRequest, RoutingStrategy, TaskType};
