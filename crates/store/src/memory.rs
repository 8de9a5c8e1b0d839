//! In-memory operation log, session store, and base-dataset source.
//!
//! Suitable for tests and small single-process deployments. Sequence
//! assignment happens while holding the sandbox's map entry, which gives
//! the same atomicity the SQLite backend gets from its transaction.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use sandboxer_core::{
    clock, ids,
    traits::{BaseSource, OperationStore, SessionStore},
    types::{row_id, values_match, NewOperation, OperationRecord, RecordData, SandboxSession},
    Result,
};

/// In-memory operation log and session rows.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Per-sandbox append-ordered logs.
    ops: DashMap<String, Vec<OperationRecord>>,
    /// Sessions by id.
    sessions: DashMap<String, SandboxSession>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total operation records across all sandboxes.
    pub fn operation_count(&self) -> usize {
        self.ops.iter().map(|r| r.value().len()).sum()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn append_next(&self, op: NewOperation) -> Result<OperationRecord> {
        // The entry guard serializes appends for this sandbox, so the
        // max-then-push below cannot race.
        let mut log = self.ops.entry(op.sandbox_id.clone()).or_default();

        let next_sequence = log
            .iter()
            .filter(|r| r.table_name == op.table_name && r.record_id == op.record_id)
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(0);

        let record = OperationRecord {
            id: ids::new_id(),
            sandbox_id: op.sandbox_id,
            table_name: op.table_name,
            record_id: op.record_id,
            operation: op.operation,
            data: op.data,
            changed_fields: op.changed_fields,
            sequence: next_sequence,
            created_at: clock::now_unix(),
        };

        log.push(record.clone());
        Ok(record)
    }

    async fn records_for_table(
        &self,
        sandbox_id: &str,
        table: &str,
    ) -> Result<Vec<OperationRecord>> {
        let mut records: Vec<OperationRecord> = self
            .ops
            .get(sandbox_id)
            .map(|log| {
                log.iter()
                    .filter(|r| r.table_name == table)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Stable sort keeps insertion order for equal sequences.
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn latest_for_record(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        Ok(self.ops.get(sandbox_id).and_then(|log| {
            log.iter()
                .filter(|r| r.table_name == table && r.record_id == record_id)
                .max_by_key(|r| (r.sequence, r.created_at))
                .cloned()
        }))
    }

    async fn delete_for_sandbox(&self, sandbox_id: &str) -> Result<usize> {
        Ok(self
            .ops
            .remove(sandbox_id)
            .map(|(_, log)| log.len())
            .unwrap_or(0))
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert(&self, session: &SandboxSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SandboxSession>> {
        Ok(self
            .sessions
            .iter()
            .find(|r| r.value().token == token)
            .map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SandboxSession>> {
        Ok(self.sessions.get(id).map(|r| r.clone()))
    }

    async fn expired_ids(&self, now: i64) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .iter()
            .filter(|r| r.value().is_expired(now))
            .map(|r| r.key().clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// In-memory base dataset, keyed by table name.
///
/// Stands in for the host application's real datastore in tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryBaseSource {
    tables: DashMap<String, Vec<RecordData>>,
}

impl InMemoryBaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: impl Into<String>, rows: Vec<RecordData>) -> Self {
        self.tables.insert(table.into(), rows);
        self
    }

    pub fn set_rows(&self, table: impl Into<String>, rows: Vec<RecordData>) {
        self.tables.insert(table.into(), rows);
    }

    /// Current rows of a table, empty when the table is unknown.
    pub fn rows(&self, table: &str) -> Vec<RecordData> {
        self.tables.get(table).map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BaseSource for InMemoryBaseSource {
    async fn rows_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<RecordData>> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_id(row).map(|id| ids.contains(&id)).unwrap_or(false))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn row_by_field(
        &self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordData>> {
        Ok(self.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| row.get(field).map(|v| values_match(v, value)).unwrap_or(false))
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxer_core::types::Operation;
    use serde_json::json;

    fn record_data(value: serde_json::Value) -> RecordData {
        serde_json::from_value(value).unwrap()
    }

    fn insert_op(sandbox: &str, table: &str, record: &str) -> NewOperation {
        NewOperation::new(
            sandbox,
            table,
            record,
            Operation::Insert,
            record_data(json!({"id": record, "name": "x"})),
        )
    }

    #[tokio::test]
    async fn sequences_start_at_zero_per_group() {
        let store = InMemoryStore::new();

        let first = store.append_next(insert_op("s1", "posts", "a")).await.unwrap();
        let second = store.append_next(insert_op("s1", "posts", "a")).await.unwrap();
        let other_record = store.append_next(insert_op("s1", "posts", "b")).await.unwrap();
        let other_table = store.append_next(insert_op("s1", "tags", "a")).await.unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(other_record.sequence, 0);
        assert_eq!(other_table.sequence, 0);
    }

    #[tokio::test]
    async fn concurrent_appends_never_share_a_sequence() {
        let store = std::sync::Arc::new(InMemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_next(insert_op("s1", "posts", "a")).await.unwrap()
            }));
        }

        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap().sequence);
        }
        sequences.sort_unstable();
        let expected: Vec<i64> = (0..32).collect();
        assert_eq!(sequences, expected);
    }

    #[tokio::test]
    async fn records_for_table_is_sequence_ordered() {
        let store = InMemoryStore::new();
        store.append_next(insert_op("s1", "posts", "a")).await.unwrap();
        store.append_next(insert_op("s1", "posts", "b")).await.unwrap();
        store.append_next(insert_op("s1", "posts", "a")).await.unwrap();

        let records = store.records_for_table("s1", "posts").await.unwrap();
        assert_eq!(records.len(), 3);
        let sequences: Vec<i64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 0, 1]);
    }

    #[tokio::test]
    async fn delete_for_sandbox_reports_count() {
        let store = InMemoryStore::new();
        store.append_next(insert_op("s1", "posts", "a")).await.unwrap();
        store.append_next(insert_op("s1", "posts", "b")).await.unwrap();
        store.append_next(insert_op("s2", "posts", "c")).await.unwrap();

        assert_eq!(store.delete_for_sandbox("s1").await.unwrap(), 2);
        assert_eq!(store.delete_for_sandbox("s1").await.unwrap(), 0);
        assert_eq!(store.operation_count(), 1);
    }

    #[tokio::test]
    async fn base_source_matches_loose_ids() {
        let base = InMemoryBaseSource::new().with_table(
            "users",
            vec![record_data(json!({"id": 1, "email": "a@x.com"}))],
        );

        let rows = base.rows_by_ids("users", &["1".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);

        let row = base
            .row_by_field("users", "email", &json!("a@x.com"))
            .await
            .unwrap();
        assert!(row.is_some());

        let missing = base
            .row_by_field("users", "email", &json!("b@x.com"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
