//! Shared vocabulary for the routing core.

use crate::error::MeridianError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of AI-assisted work with task-specific quality criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Outbound email drafting for a lead.
    EmailGeneration,
    /// Long-form marketing or template content.
    ContentGeneration,
    /// Structured fit score for a lead.
    LeadScoring,
    /// Structured extraction from a scraped website.
    WebsiteAnalysis,
    /// Reply to an inbound conversation message.
    ConversationReply,
    /// Condensing a longer source text.
    Summarization,
    /// Labelling an inbound reply (interested, not now, unsubscribe...).
    ResponseClassification,
}

impl TaskType {
    /// Every task type, in declaration order.
    pub const ALL: [TaskType; 7] = [
        TaskType::EmailGeneration,
        TaskType::ContentGeneration,
        TaskType::LeadScoring,
        TaskType::WebsiteAnalysis,
        TaskType::ConversationReply,
        TaskType::Summarization,
        TaskType::ResponseClassification,
    ];

    /// Stable snake_case name used in configuration, storage and telemetry.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskType::EmailGeneration => "email_generation",
            TaskType::ContentGeneration => "content_generation",
            TaskType::LeadScoring => "lead_scoring",
            TaskType::WebsiteAnalysis => "website_analysis",
            TaskType::ConversationReply => "conversation_reply",
            TaskType::Summarization => "summarization",
            TaskType::ResponseClassification => "response_classification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = MeridianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        TaskType::ALL.into_iter().find(|t| t.as_str() == normalized).ok_or_else(|| {
            MeridianError::Validation(format!(
                "Unknown task type '{}'. Valid options: {}",
                s,
                TaskType::ALL.iter().map(TaskType::as_str).collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

/// Named router ranking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Highest historical quality first.
    BestQuality,
    /// Highest quality per dollar first.
    BestCost,
    /// Lowest mean latency first.
    Fastest,
    /// Weighted blend of quality, cost and latency.
    #[default]
    Balanced,
}

impl RoutingStrategy {
    /// Converts RoutingStrategy to string for telemetry.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::BestQuality => "best_quality",
            RoutingStrategy::BestCost => "best_cost",
            RoutingStrategy::Fastest => "fastest",
            RoutingStrategy::Balanced => "balanced",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = MeridianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "best_quality" | "quality" => Ok(RoutingStrategy::BestQuality),
            "best_cost" | "cost" => Ok(RoutingStrategy::BestCost),
            "fastest" | "latency" => Ok(RoutingStrategy::Fastest),
            "balanced" => Ok(RoutingStrategy::Balanced),
            _ => Err(MeridianError::Validation(format!(
                "Invalid strategy: {}. Valid options: best_quality, best_cost, fastest, balanced",
                s
            ))),
        }
    }
}

/// Coarse latency expectation for a model, used until real latency history exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    /// Small, low-latency models.
    Fast,
    /// Typical hosted frontier models.
    #[default]
    Standard,
    /// Large reasoning models.
    Slow,
}

impl LatencyClass {
    /// Nominal latency in milliseconds.
    #[must_use]
    pub const fn nominal_ms(&self) -> f64 {
        match self {
            LatencyClass::Fast => 600.0,
            LatencyClass::Standard => 1800.0,
            LatencyClass::Slow => 4500.0,
        }
    }
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyClass::Fast => write!(f, "fast"),
            LatencyClass::Standard => write!(f, "standard"),
            LatencyClass::Slow => write!(f, "slow"),
        }
    }
}

/// Where a routing or cost figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    /// Aggregated from execution records in the trailing window.
    History,
    /// Taken from the model descriptor (quality prior, latency class, list price).
    Prior,
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::History => write!(f, "history"),
            Evidence::Prior => write!(f, "prior"),
        }
    }
}

/// Token shape used to price a request before any history exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRequest {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
}

impl Default for ReferenceRequest {
    fn default() -> Self {
        Self { input_tokens: 1000, output_tokens: 500 }
    }
}
