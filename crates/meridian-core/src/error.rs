//! Error types for the routing core.

use crate::types::TaskType;
use meridian_abstraction::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, MeridianError>;

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A model descriptor.
    Model,
    /// A recorded execution.
    Execution,
    /// An A/B test.
    AbTest,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Model => write!(f, "model"),
            EntityKind::Execution => write!(f, "execution"),
            EntityKind::AbTest => write!(f, "A/B test"),
        }
    }
}

/// One failed attempt in a fallback sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Model that failed.
    pub model_id: String,
    /// What the provider reported.
    pub error: ProviderError,
}

/// Core errors.
///
/// Every operation fails fast with one of these; none substitutes a partially
/// valid result for an explicit failure.
#[derive(Debug, Error)]
pub enum MeridianError {
    /// Malformed input. Nothing was applied.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown model, execution or test id.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: EntityKind,
        /// The id that was not found.
        id: String,
    },

    /// Constraints eliminated every candidate.
    #[error("No eligible model for task '{task_type}': {reason}")]
    NoEligibleModel {
        /// Task that was being routed.
        task_type: TaskType,
        /// Why the candidate set ended up empty.
        reason: String,
    },

    /// No scoring or routing strategy is registered for the task type.
    #[error("Unsupported task type: {0}")]
    UnsupportedTaskType(String),

    /// Every fallback candidate failed; `source` is the last provider error.
    #[error("Provider error after {} attempt(s): {source}", .failures.len())]
    Provider {
        /// All failures recorded in order.
        failures: Vec<FailureRecord>,
        /// The most recent failure.
        source: ProviderError,
    },

    /// The record store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MeridianError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Whether the caller may retry the same operation later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Provider { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot currently accept reads or writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A writer panicked while holding the store lock.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// A record with this execution id is already stored.
    #[error("duplicate execution id {0}")]
    Duplicate(uuid::Uuid),
}

impl StorageError {
    /// Corrupt rows and duplicate ids stay that way; everything else may
    /// clear up.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialization(_) | Self::Duplicate(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let error = MeridianError::not_found(EntityKind::AbTest, "exp-1");
        assert_eq!(error.to_string(), "A/B test not found: exp-1");
    }

    #[test]
    fn test_no_eligible_model_display() {
        let error = MeridianError::NoEligibleModel {
            task_type: TaskType::LeadScoring,
            reason: "min_quality_score 95".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("lead_scoring"));
        assert!(msg.contains("min_quality_score 95"));
    }

    #[test]
    fn test_provider_error_display_counts_attempts() {
        let source = ProviderError::Request("reset".to_string());
        let error = MeridianError::Provider {
            failures: vec![
                FailureRecord { model_id: "a".to_string(), error: source.clone() },
                FailureRecord { model_id: "b".to_string(), error: source.clone() },
            ],
            source,
        };
        assert!(error.to_string().starts_with("Provider error after 2 attempt(s)"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_storage_retryability() {
        let unavailable: MeridianError = StorageError::Unavailable("disk full".to_string()).into();
        assert!(unavailable.is_retryable());

        let corrupt = serde_json::from_str::<u32>("nope").unwrap_err();
        let corrupt: MeridianError = StorageError::from(corrupt).into();
        assert!(!corrupt.is_retryable());

        let duplicate: MeridianError = StorageError::Duplicate(uuid::Uuid::nil()).into();
        assert!(!duplicate.is_retryable());

        assert!(!MeridianError::Validation("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_error_from_database_error() {
        let db_error = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let error: StorageError = db_error.into();
        assert!(matches!(error, StorageError::Database(_)));
        assert!(error.is_retryable());
    }
}
