use serde::{Deserialize, Serialize};

use super::record::RecordData;

/// Kind of logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// A sandboxed row creation.
    Insert,
    /// A sandboxed field change; carries the sparse diff.
    Update,
    /// A sandboxed row removal.
    Delete,
    /// A base row captured into the session at creation.
    Snapshot,
    /// The demo credential's backing row, seeded at creation.
    Auth,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Snapshot => "SNAPSHOT",
            Operation::Auth => "AUTH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Operation::Insert),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            "SNAPSHOT" => Some(Operation::Snapshot),
            "AUTH" => Some(Operation::Auth),
            _ => None,
        }
    }
}

/// One logged attempted mutation or seed entry.
///
/// Records are append-only: corrections arrive as new records with a higher
/// `sequence`, never as updates in place. Within a
/// `(sandbox_id, table_name, record_id)` group the record with the maximum
/// sequence alone decides whether the logical row is visible and what it
/// contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub sandbox_id: String,
    pub table_name: String,
    pub record_id: String,
    pub operation: Operation,
    /// Full payload; for UPDATE the pre-image merged with the changes.
    pub data: RecordData,
    /// Sparse diff, UPDATE only.
    pub changed_fields: Option<RecordData>,
    pub sequence: i64,
    pub created_at: i64,
}

/// Input for an append. The store assigns id, sequence, and timestamp.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub sandbox_id: String,
    pub table_name: String,
    pub record_id: String,
    pub operation: Operation,
    pub data: RecordData,
    pub changed_fields: Option<RecordData>,
}

impl NewOperation {
    pub fn new(
        sandbox_id: impl Into<String>,
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        data: RecordData,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            table_name: table_name.into(),
            record_id: record_id.into(),
            operation,
            data,
            changed_fields: None,
        }
    }

    pub fn with_changed_fields(mut self, changed: RecordData) -> Self {
        self.changed_fields = Some(changed);
        self
    }
}
