//! Write and read interception.
//!
//! The host's data-access layer calls `before_write` for every attempted
//! INSERT/UPDATE/DELETE and `before_read` for every fetched row, and obeys
//! the returned decision. Inside a sandbox the mutation lands in the
//! operation log and the real write never runs.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use sandboxer_core::{
    ids,
    types::{canonical_id, Operation, NewOperation, RecordData, SandboxContext},
    Error, Result,
};

use crate::storage::OverlayStorage;

/// Upper bound on remembered hook events. The window is cleared wholesale
/// on overflow, so deduplication is approximate by design.
const DEDUP_WINDOW_CAP: usize = 1000;

/// An attempted mutation, as seen by the host's hook point.
#[derive(Debug, Clone)]
pub enum MutationIntent {
    Insert {
        payload: RecordData,
    },
    Update {
        /// Row state before the mutation.
        pre_image: RecordData,
        /// Sparse diff of fields the host is about to change.
        changes: RecordData,
    },
    Delete {
        payload: RecordData,
    },
}

/// What the host must do with the attempted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    /// No sandbox in scope or excluded table: the real write proceeds.
    PassThrough,
    /// Recorded in the overlay; the host must treat the mutation as having
    /// succeeded without touching the base dataset. For inserts the host
    /// adopts `record_id` as the row's identity.
    Logged { record_id: String },
}

/// What the host must do with a row it just fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadDecision {
    Unchanged,
    /// The row is logically deleted inside the sandbox.
    Veto,
    /// Overlay these fields onto the fetched row.
    Substitute(RecordData),
}

/// Converts attempted mutations into log appends and vetoes the real write.
pub struct WriteInterceptor {
    storage: Arc<OverlayStorage>,
    excluded_tables: HashSet<String>,
    seen_events: DashMap<String, ()>,
}

impl WriteInterceptor {
    pub fn new(
        storage: Arc<OverlayStorage>,
        excluded_tables: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            storage,
            excluded_tables: excluded_tables.into_iter().collect(),
            seen_events: DashMap::new(),
        }
    }

    /// Decide an attempted mutation.
    ///
    /// `event_key` identifies the hook firing (derived from the record
    /// instance); when the host's event system delivers overlapping
    /// notifications for one logical mutation, at most one duplicate is
    /// suppressed.
    pub async fn before_write(
        &self,
        ctx: &SandboxContext,
        table: &str,
        record_id: Option<&str>,
        intent: MutationIntent,
        event_key: Option<&str>,
    ) -> Result<WriteDecision> {
        let Some(sandbox_id) = ctx.sandbox_id() else {
            return Ok(WriteDecision::PassThrough);
        };
        if self.excluded_tables.contains(table) {
            return Ok(WriteDecision::PassThrough);
        }

        let (operation, record_id, data, changed_fields) = match intent {
            MutationIntent::Insert { mut payload } => {
                let record_id = record_id
                    .map(str::to_string)
                    .or_else(|| payload.get("id").and_then(canonical_id))
                    .unwrap_or_else(ids::generated_record_id);
                // The logged payload carries the identity it was filed under.
                payload
                    .entry("id".to_string())
                    .or_insert(Value::String(record_id.clone()));
                (Operation::Insert, record_id, payload, None)
            }
            MutationIntent::Update { pre_image, changes } => {
                let record_id = resolve_record_id(record_id, &pre_image)?;
                if changes.is_empty() {
                    // Nothing dirty; logical success with no log entry.
                    return Ok(WriteDecision::Logged { record_id });
                }
                let mut merged = pre_image;
                for (field, value) in &changes {
                    merged.insert(field.clone(), value.clone());
                }
                (Operation::Update, record_id, merged, Some(changes))
            }
            MutationIntent::Delete { payload } => {
                let record_id = resolve_record_id(record_id, &payload)?;
                (Operation::Delete, record_id, payload, None)
            }
        };

        if let Some(key) = event_key {
            if self.already_processed(key) {
                tracing::debug!(table = %table, record = %record_id, "Duplicate hook firing suppressed");
                return Ok(WriteDecision::Logged { record_id });
            }
        }

        let mut op = NewOperation::new(sandbox_id, table, record_id.as_str(), operation, data);
        if let Some(changed) = changed_fields {
            op = op.with_changed_fields(changed);
        }

        let record = self.storage.append(op).await?;
        tracing::debug!(
            sandbox = %sandbox_id,
            table = %table,
            record = %record.record_id,
            operation = %record.operation.as_str(),
            sequence = record.sequence,
            "Mutation diverted into overlay"
        );

        Ok(WriteDecision::Logged { record_id })
    }

    /// Decide a fetched row: veto it, substitute overlaid fields, or let it
    /// through untouched.
    pub async fn before_read(
        &self,
        ctx: &SandboxContext,
        table: &str,
        record_id: &str,
    ) -> Result<ReadDecision> {
        let Some(sandbox_id) = ctx.sandbox_id() else {
            return Ok(ReadDecision::Unchanged);
        };
        if self.excluded_tables.contains(table) {
            return Ok(ReadDecision::Unchanged);
        }

        match self.storage.find_record(sandbox_id, table, record_id).await? {
            Some(op) => Ok(match op.operation {
                Operation::Delete => ReadDecision::Veto,
                Operation::Update => {
                    ReadDecision::Substitute(op.changed_fields.unwrap_or_default())
                }
                _ => ReadDecision::Unchanged,
            }),
            None => Ok(ReadDecision::Unchanged),
        }
    }

    /// Record the event in the dedup window; true when it was already there.
    fn already_processed(&self, event_key: &str) -> bool {
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(event_key.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        if self.seen_events.contains_key(&digest) {
            return true;
        }
        if self.seen_events.len() >= DEDUP_WINDOW_CAP {
            self.seen_events.clear();
        }
        self.seen_events.insert(digest, ());
        false
    }
}

fn resolve_record_id(record_id: Option<&str>, payload: &RecordData) -> Result<String> {
    record_id
        .map(str::to_string)
        .or_else(|| payload.get("id").and_then(canonical_id))
        .ok_or_else(|| Error::internal("mutation intent without a record identity"))
}
