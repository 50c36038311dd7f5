//! Execution records and feedback.

use crate::quality::ScoringContext;
use crate::types::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One model invocation as stored by the tracker. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Server-assigned id.
    pub id: Uuid,
    /// Model that served the request.
    pub model_id: String,
    /// Task the request belonged to.
    pub task_type: TaskType,
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
    /// Cost in USD, computed from the token counts and the model's pricing.
    pub cost: f64,
    /// Observed latency in milliseconds.
    pub latency_ms: f64,
    /// Quality score, 0-100, if the output was scored.
    pub quality_score: Option<f64>,
    /// Latest feedback attached to this execution.
    pub feedback: Option<UserFeedback>,
    /// Provider error text when the invocation failed.
    pub error: Option<String>,
    /// When the invocation happened.
    pub timestamp: DateTime<Utc>,
    /// A/B test the request was assigned through.
    pub ab_test_id: Option<String>,
    /// Variant tag within that test.
    pub variant: Option<String>,
}

impl ExecutionRecord {
    /// Whether the invocation produced an output.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Post-hoc human judgement of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFeedback {
    /// Rating from 1 (unusable) to 5 (sent as-is).
    pub rating: u8,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the feedback arrived.
    pub submitted_at: DateTime<Utc>,
}

impl UserFeedback {
    /// Feedback submitted now.
    #[must_use]
    pub fn new(rating: u8, comment: Option<String>) -> Self {
        Self { rating, comment, submitted_at: Utc::now() }
    }
}

/// What a caller reports after invoking a model.
///
/// Build with [`ExecutionOutcome::new`] and the `with_*` methods. Cost is never
/// taken from the caller; `reported_cost` is only checked for sanity and
/// compared against the computed value in logs.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub model_id: String,
    pub task_type: TaskType,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: f64,
    pub reported_cost: Option<f64>,
    pub quality_score: Option<f64>,
    /// Raw output, used only for auto-scoring and never stored.
    pub output: Option<String>,
    pub scoring_context: Option<ScoringContext>,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub ab_test_id: Option<String>,
    pub variant: Option<String>,
}

impl ExecutionOutcome {
    /// A successful invocation of `model_id` for `task_type`.
    #[must_use]
    pub fn new(model_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            model_id: model_id.into(),
            task_type,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0.0,
            reported_cost: None,
            quality_score: None,
            output: None,
            scoring_context: None,
            error: None,
            timestamp: None,
            ab_test_id: None,
            variant: None,
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    #[must_use]
    pub fn with_reported_cost(mut self, cost: f64) -> Self {
        self.reported_cost = Some(cost);
        self
    }

    #[must_use]
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    /// Attaches the raw output so the tracker can score it.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>, context: Option<ScoringContext>) -> Self {
        self.output = Some(output.into());
        self.scoring_context = context;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Tags the outcome with an A/B test and the variant that served it.
    #[must_use]
    pub fn with_ab_test(mut self, test_id: impl Into<String>, variant: impl Into<String>) -> Self {
        self.ab_test_id = Some(test_id.into());
        self.variant = Some(variant.into());
        self
    }
}
