//! SQLite-backed record store.

use super::{RecordQuery, RecordStore};
use crate::error::{StorageError, StorageResult};
use crate::tracker::record::{ExecutionRecord, UserFeedback};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const SELECT_RECORDS: &str = "
    SELECT e.id, e.model_id, e.task_type, e.input_tokens, e.output_tokens, e.cost,
           e.latency_ms, e.quality_score, e.error, e.timestamp_ns, e.ab_test_id, e.variant,
           f.rating, f.comment, f.submitted_at_ns
    FROM executions e
    LEFT JOIN execution_feedback f
        ON f.seq = (SELECT MAX(seq) FROM execution_feedback WHERE execution_id = e.id)";

/// Durable store for a single process. Writes are serialized through one
/// connection; SQLite's own locking handles other processes on the same file.
#[derive(Debug)]
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

/// Columns read straight off a row, decoded outside the rusqlite closure so
/// decode failures surface as `StorageError::Serialization`.
struct RawRecord {
    id: String,
    model_id: String,
    task_type: String,
    input_tokens: u32,
    output_tokens: u32,
    cost: f64,
    latency_ms: f64,
    quality_score: Option<f64>,
    error: Option<String>,
    timestamp_ns: i64,
    ab_test_id: Option<String>,
    variant: Option<String>,
    rating: Option<u8>,
    comment: Option<String>,
    submitted_at_ns: Option<i64>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            model_id: row.get(1)?,
            task_type: row.get(2)?,
            input_tokens: row.get(3)?,
            output_tokens: row.get(4)?,
            cost: row.get(5)?,
            latency_ms: row.get(6)?,
            quality_score: row.get(7)?,
            error: row.get(8)?,
            timestamp_ns: row.get(9)?,
            ab_test_id: row.get(10)?,
            variant: row.get(11)?,
            rating: row.get(12)?,
            comment: row.get(13)?,
            submitted_at_ns: row.get(14)?,
        })
    }

    fn decode(self) -> StorageResult<ExecutionRecord> {
        let feedback = match (self.rating, self.submitted_at_ns) {
            (Some(rating), Some(submitted_at_ns)) => Some(UserFeedback {
                rating,
                comment: self.comment,
                submitted_at: DateTime::from_timestamp_nanos(submitted_at_ns),
            }),
            _ => None,
        };
        Ok(ExecutionRecord {
            id: decode_text(self.id)?,
            model_id: self.model_id,
            task_type: decode_text(self.task_type)?,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost: self.cost,
            latency_ms: self.latency_ms,
            quality_score: self.quality_score,
            feedback,
            error: self.error,
            timestamp: DateTime::from_timestamp_nanos(self.timestamp_ns),
            ab_test_id: self.ab_test_id,
            variant: self.variant,
        })
    }
}

/// Decodes a TEXT column holding a serde string value (uuid, snake_case enum).
fn decode_text<T: DeserializeOwned>(text: String) -> StorageResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(text))?)
}

fn encode_nanos(timestamp: DateTime<Utc>) -> StorageResult<i64> {
    timestamp.timestamp_nanos_opt().ok_or_else(|| {
        StorageError::Serialization(<serde_json::Error as serde::ser::Error>::custom(format!(
            "timestamp {timestamp} outside the storable range"
        )))
    })
}

impl SqliteRecordStore {
    /// Opens (or creates) the database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %path.as_ref().display(), "Opened execution record database");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    fn connection(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS executions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                model_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost REAL NOT NULL,
                latency_ms REAL NOT NULL,
                quality_score REAL,
                error TEXT,
                timestamp_ns INTEGER NOT NULL,
                ab_test_id TEXT,
                variant TEXT
            );

            CREATE TABLE IF NOT EXISTS execution_feedback (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT,
                submitted_at_ns INTEGER NOT NULL,
                FOREIGN KEY (execution_id) REFERENCES executions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_executions_model_task_time
                ON executions(model_id, task_type, timestamp_ns);
            CREATE INDEX IF NOT EXISTS idx_executions_ab_test ON executions(ab_test_id);
            CREATE INDEX IF NOT EXISTS idx_execution_feedback_execution
                ON execution_feedback(execution_id);
            ",
        )?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn append(&self, record: &ExecutionRecord) -> StorageResult<()> {
        let timestamp_ns = encode_nanos(record.timestamp)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO executions (id, model_id, task_type, input_tokens, output_tokens, cost,
                                     latency_ms, quality_score, error, timestamp_ns, ab_test_id, variant)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.to_string(),
                record.model_id,
                record.task_type.as_str(),
                record.input_tokens,
                record.output_tokens,
                record.cost,
                record.latency_ms,
                record.quality_score,
                record.error,
                timestamp_ns,
                record.ab_test_id,
                record.variant,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StorageError::Duplicate(record.id),
            _ => StorageError::Database(e),
        })?;
        Ok(())
    }

    fn append_feedback(&self, execution_id: Uuid, feedback: &UserFeedback) -> StorageResult<bool> {
        let submitted_at_ns = encode_nanos(feedback.submitted_at)?;
        let conn = self.connection()?;
        let id = execution_id.to_string();
        let exists = conn
            .query_row("SELECT 1 FROM executions WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO execution_feedback (execution_id, rating, comment, submitted_at_ns)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, feedback.rating, feedback.comment, submitted_at_ns],
        )?;
        Ok(true)
    }

    fn get(&self, execution_id: Uuid) -> StorageResult<Option<ExecutionRecord>> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_RECORDS} WHERE e.id = ?1"),
                params![execution_id.to_string()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    fn query(&self, query: &RecordQuery) -> StorageResult<Vec<ExecutionRecord>> {
        let since = query.since.map(encode_nanos).transpose()?;
        let until = query.until.map(encode_nanos).transpose()?;
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RECORDS}
             WHERE (?1 IS NULL OR e.model_id = ?1)
               AND (?2 IS NULL OR e.task_type = ?2)
               AND (?3 IS NULL OR e.timestamp_ns >= ?3)
               AND (?4 IS NULL OR e.timestamp_ns <= ?4)
               AND (?5 IS NULL OR e.ab_test_id = ?5)
             ORDER BY e.timestamp_ns, e.seq"
        ))?;
        let raws = stmt
            .query_map(
                params![
                    query.model_id,
                    query.task_type.map(|t| t.as_str()),
                    since,
                    until,
                    query.ab_test_id,
                ],
                RawRecord::from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::decode).collect()
    }

    fn count(&self) -> StorageResult<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::store::tests::{check_store_contract, sample};
    use crate::types::TaskType;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_store_contract() {
        check_store_contract(&SqliteRecordStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meridian.db");
        let record = sample("gemini-2.5-flash", TaskType::Summarization, Utc::now());

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.append(&record).unwrap();
            assert!(store.append_feedback(record.id, &UserFeedback::new(4, None)).unwrap());
        }

        let reopened = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        let fetched = reopened.get(record.id).unwrap().unwrap();
        assert_eq!(fetched.timestamp, record.timestamp);
        assert_eq!(fetched.task_type, TaskType::Summarization);
        assert_eq!(fetched.feedback.map(|f| f.rating), Some(4));
    }

    #[test]
    fn test_sqlite_rejects_duplicate_ids() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let record = sample("m", TaskType::LeadScoring, Utc::now());
        store.append(&record).unwrap();
        let err = store.append(&record).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(id) if id == record.id));
        assert!(!err.is_retryable());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_task_type_is_serialization_error() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let record = sample("m", TaskType::LeadScoring, Utc::now());
        store.append(&record).unwrap();
        store
            .connection()
            .unwrap()
            .execute("UPDATE executions SET task_type = 'poetry'", [])
            .unwrap();
        let err = store.get(record.id).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
