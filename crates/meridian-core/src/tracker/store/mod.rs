//! Append-only persistence for execution records.
//!
//! Records are never updated in place. Feedback goes to its own append-only
//! log and the latest entry is merged into the record on read, so concurrent
//! writers cannot lose each other's updates.

mod sqlite;

use super::record::{ExecutionRecord, UserFeedback};
use crate::error::{StorageError, StorageResult};
use crate::types::TaskType;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

pub use sqlite::SqliteRecordStore;

/// Range query over execution records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub model_id: Option<String>,
    pub task_type: Option<TaskType>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub ab_test_id: Option<String>,
}

impl RecordQuery {
    /// Matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    #[must_use]
    pub fn task(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    #[must_use]
    pub fn ab_test(mut self, test_id: impl Into<String>) -> Self {
        self.ab_test_id = Some(test_id.into());
        self
    }

    /// Whether `record` satisfies every set field.
    #[must_use]
    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.model_id.as_ref().is_none_or(|m| *m == record.model_id)
            && self.task_type.is_none_or(|t| t == record.task_type)
            && self.since.is_none_or(|s| record.timestamp >= s)
            && self.until.is_none_or(|u| record.timestamp <= u)
            && self.ab_test_id.as_ref().is_none_or(|id| record.ab_test_id.as_ref() == Some(id))
    }
}

/// The persistence capability the tracker appends to and reads from.
///
/// Implementations must be safe to call from many threads at once. Query
/// results are ordered by timestamp, ties in append order.
pub trait RecordStore: Send + Sync {
    /// Appends a record.
    fn append(&self, record: &ExecutionRecord) -> StorageResult<()>;

    /// Appends feedback for an execution. Returns `false` if the execution is unknown.
    fn append_feedback(&self, execution_id: Uuid, feedback: &UserFeedback) -> StorageResult<bool>;

    /// Looks up one record with its latest feedback merged in.
    fn get(&self, execution_id: Uuid) -> StorageResult<Option<ExecutionRecord>>;

    /// Records matching `query` with their latest feedback merged in.
    fn query(&self, query: &RecordQuery) -> StorageResult<Vec<ExecutionRecord>>;

    /// Number of stored records.
    fn count(&self) -> StorageResult<usize>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<ExecutionRecord>,
    index: HashMap<Uuid, usize>,
    feedback: HashMap<Uuid, Vec<UserFeedback>>,
}

impl MemoryState {
    fn merged(&self, record: &ExecutionRecord) -> ExecutionRecord {
        let mut merged = record.clone();
        if let Some(latest) = self.feedback.get(&record.id).and_then(|log| log.last()) {
            merged.feedback = Some(latest.clone());
        }
        merged
    }
}

/// Process-local store. Suitable for tests, simulations and single-process
/// deployments that can afford to lose history on restart.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(e: impl std::fmt::Display) -> StorageError {
    StorageError::LockPoisoned(e.to_string())
}

impl RecordStore for InMemoryRecordStore {
    fn append(&self, record: &ExecutionRecord) -> StorageResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if state.index.contains_key(&record.id) {
            return Err(StorageError::Duplicate(record.id));
        }
        let position = state.records.len();
        state.index.insert(record.id, position);
        state.records.push(record.clone());
        Ok(())
    }

    fn append_feedback(&self, execution_id: Uuid, feedback: &UserFeedback) -> StorageResult<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        if !state.index.contains_key(&execution_id) {
            return Ok(false);
        }
        state.feedback.entry(execution_id).or_default().push(feedback.clone());
        Ok(true)
    }

    fn get(&self, execution_id: Uuid) -> StorageResult<Option<ExecutionRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.index.get(&execution_id).map(|&i| state.merged(&state.records[i])))
    }

    fn query(&self, query: &RecordQuery) -> StorageResult<Vec<ExecutionRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut matching: Vec<ExecutionRecord> =
            state.records.iter().filter(|r| query.matches(r)).map(|r| state.merged(r)).collect();
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching)
    }

    fn count(&self) -> StorageResult<usize> {
        Ok(self.state.read().map_err(poisoned)?.records.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample(model: &str, task_type: TaskType, timestamp: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            model_id: model.to_string(),
            task_type,
            input_tokens: 120,
            output_tokens: 80,
            cost: 0.002,
            latency_ms: 900.0,
            quality_score: Some(75.0),
            feedback: None,
            error: None,
            timestamp,
            ab_test_id: None,
            variant: None,
        }
    }

    /// Exercises the contract every `RecordStore` must satisfy.
    pub(crate) fn check_store_contract(store: &dyn RecordStore) {
        let now = Utc::now();
        let old = sample("gpt-4o", TaskType::EmailGeneration, now - Duration::days(10));
        let recent = sample("gpt-4o", TaskType::EmailGeneration, now - Duration::hours(1));
        let other_task = sample("gpt-4o", TaskType::Summarization, now);
        let mut tagged = sample("claude-haiku-4.5", TaskType::EmailGeneration, now - Duration::minutes(5));
        tagged.ab_test_id = Some("exp-1".to_string());
        tagged.variant = Some("claude-haiku-4.5".to_string());
        tagged.error = Some("rate limited".to_string());
        tagged.quality_score = None;

        // Appended out of timestamp order on purpose.
        for record in [&recent, &old, &other_task, &tagged] {
            store.append(record).unwrap();
        }
        assert_eq!(store.count().unwrap(), 4);

        let all_email = store.query(&RecordQuery::new().task(TaskType::EmailGeneration)).unwrap();
        let ids: Vec<Uuid> = all_email.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![old.id, recent.id, tagged.id]);

        let windowed = store
            .query(&RecordQuery::new().model("gpt-4o").task(TaskType::EmailGeneration).since(now - Duration::days(7)))
            .unwrap();
        assert_eq!(windowed, vec![recent.clone()]);

        let by_test = store.query(&RecordQuery::new().ab_test("exp-1")).unwrap();
        assert_eq!(by_test, vec![tagged.clone()]);

        let bounded = store.query(&RecordQuery::new().until(now - Duration::days(1))).unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].id, old.id);

        assert!(store.append_feedback(recent.id, &UserFeedback::new(2, None)).unwrap());
        assert!(store.append_feedback(recent.id, &UserFeedback::new(5, Some("great".to_string()))).unwrap());
        assert!(!store.append_feedback(Uuid::new_v4(), &UserFeedback::new(3, None)).unwrap());

        let fetched = store.get(recent.id).unwrap().unwrap();
        let feedback = fetched.feedback.unwrap();
        assert_eq!(feedback.rating, 5);
        assert_eq!(feedback.comment.as_deref(), Some("great"));
        assert_eq!(fetched.cost, recent.cost);

        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_store_contract() {
        check_store_contract(&InMemoryRecordStore::new());
    }

    #[test]
    fn test_in_memory_rejects_duplicate_ids() {
        let store = InMemoryRecordStore::new();
        let record = sample("m", TaskType::LeadScoring, Utc::now());
        store.append(&record).unwrap();
        let err = store.append(&record).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(id) if id == record.id));
        assert!(!err.is_retryable());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_query_matches_unset_fields() {
        let record = sample("m", TaskType::LeadScoring, Utc::now());
        assert!(RecordQuery::new().matches(&record));
        assert!(!RecordQuery::new().ab_test("exp").matches(&record));
    }
}
