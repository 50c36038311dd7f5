//! Heuristic output quality scoring.
//!
//! Each task type with task-specific quality criteria owns one
//! [`ScoringStrategy`]. Strategies are looked up in a fixed table keyed by
//! [`TaskType`]; adding support for a task means adding a table entry.
//!
//! A strategy inspects signals in the output (required structure, length
//! bounds, banned patterns, numeric plausibility) and folds them into a 0-100
//! score with a per-dimension breakdown. Scoring is pure: the same output and
//! context always produce the same [`QualityScore`].

mod signals;
mod strategies;

use crate::error::{MeridianError, Result};
use crate::types::TaskType;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use strategies::{
    ContentStrategy, ConversationReplyStrategy, EmailStrategy, LeadScoringStrategy,
    SummarizationStrategy, WebsiteAnalysisStrategy,
};

/// Caller-supplied facts a strategy may check the output against.
///
/// Every field is optional; a strategy treats a missing field as "nothing to
/// check" rather than as a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringContext {
    /// Name the output should address.
    pub recipient_name: Option<String>,
    /// Company the output is about or addressed to.
    pub company_name: Option<String>,
    /// Terms the output is expected to mention.
    pub required_keywords: Vec<String>,
    /// Input the output was derived from (summaries).
    pub source_text: Option<String>,
    /// Message being replied to (conversation replies).
    pub inbound_message: Option<String>,
    /// Overrides the strategy's default lower word bound.
    pub min_words: Option<usize>,
    /// Overrides the strategy's default upper word bound.
    pub max_words: Option<usize>,
}

impl ScoringContext {
    /// Word bounds, with the context's overrides taking precedence.
    #[must_use]
    pub fn word_bounds(&self, default_min: usize, default_max: usize) -> (usize, usize) {
        let min = self.min_words.unwrap_or(default_min);
        let max = self.max_words.unwrap_or(default_max).max(min);
        (min, max)
    }
}

/// One weighted component of a quality score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Dimension name, e.g. `structure` or `length`.
    pub name: String,
    /// Score for this dimension, 0-100.
    pub score: f64,
    /// Relative weight in the composite.
    pub weight: f64,
    /// What the strategy observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Composite quality score with its breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Task the output was scored for.
    pub task_type: TaskType,
    /// Weighted composite, 0-100.
    pub score: f64,
    /// Per-dimension breakdown in evaluation order.
    pub dimensions: Vec<DimensionScore>,
    /// Notable problems, e.g. `unfilled_placeholder` or `invalid_json`.
    pub flags: Vec<String>,
}

impl QualityScore {
    /// Looks up a dimension by name.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Whether the strategy raised `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Accumulates dimensions and flags, then folds them into a [`QualityScore`].
#[derive(Debug)]
pub struct ScoreBuilder {
    task_type: TaskType,
    dimensions: Vec<DimensionScore>,
    flags: Vec<String>,
}

impl ScoreBuilder {
    /// Starts an empty breakdown for `task_type`.
    #[must_use]
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type, dimensions: Vec::new(), flags: Vec::new() }
    }

    /// Adds a dimension. Scores are clamped to 0-100.
    pub fn dimension(&mut self, name: &str, weight: f64, score: f64, detail: impl Into<String>) -> &mut Self {
        let detail = detail.into();
        self.dimensions.push(DimensionScore {
            name: name.to_string(),
            score: if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 },
            weight,
            detail: (!detail.is_empty()).then_some(detail),
        });
        self
    }

    /// Raises a flag once.
    pub fn flag(&mut self, flag: &str) -> &mut Self {
        if !self.flags.iter().any(|f| f == flag) {
            self.flags.push(flag.to_string());
        }
        self
    }

    /// Weighted mean of the dimensions, rounded to two decimals.
    #[must_use]
    pub fn build(self) -> QualityScore {
        let total_weight: f64 = self.dimensions.iter().map(|d| d.weight).sum();
        let score = if total_weight > 0.0 {
            self.dimensions.iter().map(|d| d.score * d.weight).sum::<f64>() / total_weight
        } else {
            0.0
        };
        QualityScore {
            task_type: self.task_type,
            score: (score * 100.0).round() / 100.0,
            dimensions: self.dimensions,
            flags: self.flags,
        }
    }
}

/// A pure, task-specific scoring heuristic.
pub trait ScoringStrategy: Send + Sync {
    /// Task this strategy scores.
    fn task_type(&self) -> TaskType;

    /// Scores `output` against `context`.
    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore;
}

static EMAIL: EmailStrategy = EmailStrategy;
static CONTENT: ContentStrategy = ContentStrategy;
static LEAD_SCORING: LeadScoringStrategy = LeadScoringStrategy;
static WEBSITE_ANALYSIS: WebsiteAnalysisStrategy = WebsiteAnalysisStrategy;
static CONVERSATION_REPLY: ConversationReplyStrategy = ConversationReplyStrategy;
static SUMMARIZATION: SummarizationStrategy = SummarizationStrategy;

/// Task type to strategy. Response classification is judged by user feedback
/// and has no entry.
static STRATEGIES: [(TaskType, &dyn ScoringStrategy); 6] = [
    (TaskType::EmailGeneration, &EMAIL),
    (TaskType::ContentGeneration, &CONTENT),
    (TaskType::LeadScoring, &LEAD_SCORING),
    (TaskType::WebsiteAnalysis, &WEBSITE_ANALYSIS),
    (TaskType::ConversationReply, &CONVERSATION_REPLY),
    (TaskType::Summarization, &SUMMARIZATION),
];

/// Entry point for quality scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    /// Creates a scorer over the built-in strategy table.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The strategy registered for `task_type`, if any.
    #[must_use]
    pub fn strategy_for(&self, task_type: TaskType) -> Option<&'static dyn ScoringStrategy> {
        STRATEGIES.iter().find(|(task, _)| *task == task_type).map(|(_, strategy)| *strategy)
    }

    /// Whether `task_type` can be scored.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.strategy_for(task_type).is_some()
    }

    /// Task types that have a strategy, in table order.
    #[must_use]
    pub fn supported_task_types(&self) -> Vec<TaskType> {
        STRATEGIES.iter().map(|(task, _)| *task).collect()
    }

    /// Scores `output` for `task_type`.
    ///
    /// # Errors
    /// Returns `UnsupportedTaskType` if no strategy is registered for the task.
    pub fn score(&self, task_type: TaskType, output: &str, context: &ScoringContext) -> Result<QualityScore> {
        let strategy = self
            .strategy_for(task_type)
            .ok_or_else(|| MeridianError::UnsupportedTaskType(task_type.to_string()))?;
        let result = strategy.score(output, context);
        debug!(
            task_type = %task_type,
            score = result.score,
            flags = ?result.flags,
            "Scored output"
        );
        Ok(result)
    }

    /// Scores `output` for a task given by name.
    ///
    /// # Errors
    /// Returns `Validation` for an unknown task name and `UnsupportedTaskType`
    /// for a known task without a strategy.
    pub fn score_by_name(&self, task_name: &str, output: &str, context: &ScoringContext) -> Result<QualityScore> {
        let task_type: TaskType = task_name.parse()?;
        self.score(task_type, output, context)
    }
}
