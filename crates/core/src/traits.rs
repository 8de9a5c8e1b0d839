//! Trait seams between the engine and its backends.
//!
//! Backends are free to live in one process or many; all coordination
//! between concurrent requests happens through these contracts.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{NewOperation, OperationRecord, RecordData, SandboxSession};

/// Append-only per-sandbox operation log. The durable source of truth.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Append `op` with the next sequence for its
    /// `(sandbox, table, record)` group: `max(sequence) + 1`, or 0 when the
    /// group is empty. Assignment is atomic with the insert — two racing
    /// appends to one group can never claim the same sequence.
    async fn append_next(&self, op: NewOperation) -> Result<OperationRecord>;

    /// All records for a sandbox and table, sequence ascending.
    async fn records_for_table(
        &self,
        sandbox_id: &str,
        table: &str,
    ) -> Result<Vec<OperationRecord>>;

    /// Highest-sequence record for one logical row, if any.
    async fn latest_for_record(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>>;

    /// Delete every record owned by the sandbox. Returns the count removed.
    async fn delete_for_sandbox(&self, sandbox_id: &str) -> Result<usize>;
}

/// Durable sandbox session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &SandboxSession) -> Result<()>;

    async fn find_by_token(&self, token: &str) -> Result<Option<SandboxSession>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SandboxSession>>;

    /// Ids of sessions whose `expires_at` is at or before `now`.
    async fn expired_ids(&self, now: i64) -> Result<Vec<String>>;

    /// Delete a session row. Deleting an unknown id is a no-op.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Best-effort accelerator holding the latest operation per logical row.
///
/// Correctness never depends on it: every failure degrades to a store
/// round-trip. The entry for a key must always be the latest write for that
/// key, which holds because every append refreshes exactly its own key.
#[async_trait]
pub trait OperationCache: Send + Sync {
    async fn get(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>>;

    async fn put(&self, record: &OperationRecord) -> Result<()>;

    /// Drop every cached entry belonging to the sandbox.
    async fn invalidate_sandbox(&self, sandbox_id: &str) -> Result<()>;
}

/// Read-only view of the real dataset, used for snapshot capture and the
/// demo credential lookup. The engine never writes through this.
#[async_trait]
pub trait BaseSource: Send + Sync {
    /// Rows of `table` whose identity is in `ids`.
    async fn rows_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<RecordData>>;

    /// First row of `table` where `field` equals `value`.
    async fn row_by_field(
        &self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordData>>;
}
