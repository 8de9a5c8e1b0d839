//! Overlay resolution: replaying a sandbox's operation log over base rows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use sandboxer_core::{
    types::{row_id, values_match, Operation, OperationRecord, RecordData, SandboxContext},
    Result,
};

use crate::storage::OverlayStorage;

/// Equality filter over row fields, applied after overlay construction so
/// overlay rows are filtered identically to base rows.
pub type Conditions = HashMap<String, Value>;

/// Computes the effective record set for a table by merging the latest
/// logged operation per record over the base rows.
pub struct OverlayResolver {
    storage: Arc<OverlayStorage>,
    excluded_tables: HashSet<String>,
}

impl OverlayResolver {
    pub fn new(storage: Arc<OverlayStorage>, excluded_tables: impl IntoIterator<Item = String>) -> Self {
        Self {
            storage,
            excluded_tables: excluded_tables.into_iter().collect(),
        }
    }

    /// Effective rows of `table` as seen from inside the sandbox.
    ///
    /// For each record the highest-sequence operation wins (ties: latest
    /// `created_at`, then insertion order). Excluded tables and inactive
    /// contexts see exactly the base rows.
    pub async fn resolve(
        &self,
        ctx: &SandboxContext,
        table: &str,
        base_rows: Vec<RecordData>,
        conditions: &Conditions,
    ) -> Result<Vec<RecordData>> {
        let Some(sandbox_id) = ctx.sandbox_id() else {
            return Ok(filter_by_conditions(base_rows, conditions));
        };
        if self.excluded_tables.contains(table) {
            return Ok(filter_by_conditions(base_rows, conditions));
        }

        let records = self.storage.records_for_table(sandbox_id, table).await?;
        let mut effective = base_rows;

        for group in winners_by_record(records) {
            let op = &group.winner;
            match op.operation {
                Operation::Delete => {
                    effective.retain(|row| {
                        row_id(row).as_deref() != Some(op.record_id.as_str())
                    });
                }
                Operation::Update => {
                    let mut matched = false;
                    for row in effective.iter_mut() {
                        if row_id(row).as_deref() == Some(op.record_id.as_str()) {
                            *row = updated_row(row, op);
                            matched = true;
                        }
                    }
                    // A row born inside the overlay has no base row to
                    // patch; its updated image is appended instead. An
                    // update to a row that exists nowhere stays a no-op.
                    if !matched && group.overlay_born {
                        effective.push(op.data.clone());
                    }
                }
                Operation::Insert | Operation::Snapshot | Operation::Auth => {
                    effective.push(op.data.clone());
                }
            }
        }

        Ok(filter_by_conditions(effective, conditions))
    }

    /// Latest operation record for one logical row, if the sandbox has one.
    ///
    /// Read-path hooks use this to decide whether to veto a fetch (row
    /// logically deleted), substitute fields, or pass it through.
    pub async fn find_one(
        &self,
        ctx: &SandboxContext,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        let Some(sandbox_id) = ctx.sandbox_id() else {
            return Ok(None);
        };
        if self.excluded_tables.contains(table) {
            return Ok(None);
        }
        self.storage.find_record(sandbox_id, table, record_id).await
    }
}

/// One logical row's reduced log: the authoritative operation plus whether
/// the row exists only inside the overlay.
struct GroupOutcome {
    winner: OperationRecord,
    /// True when the group contains an INSERT/SNAPSHOT/AUTH, i.e. the row
    /// was born in the sandbox rather than fetched from the base.
    overlay_born: bool,
}

/// Reduce a sequence-ascending log to one outcome per record id, in
/// first-seen record order.
///
/// Records arrive ordered by `(sequence, created_at, insertion)`, so a
/// later entry with an equal-or-higher sequence replaces the current
/// winner, which is exactly the tie-break the resolver promises.
fn winners_by_record(records: Vec<OperationRecord>) -> Vec<GroupOutcome> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, GroupOutcome> = HashMap::new();

    for record in records {
        let born = matches!(
            record.operation,
            Operation::Insert | Operation::Snapshot | Operation::Auth
        );
        match groups.get_mut(&record.record_id) {
            Some(group) => {
                group.overlay_born |= born;
                if (record.sequence, record.created_at)
                    >= (group.winner.sequence, group.winner.created_at)
                {
                    group.winner = record;
                }
            }
            None => {
                order.push(record.record_id.clone());
                groups.insert(
                    record.record_id.clone(),
                    GroupOutcome {
                        winner: record,
                        overlay_born: born,
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .collect()
}

/// Replacement value for an updated base row: the operation's payload
/// (pre-image merged with the diff at capture time), falling back to
/// merging the diff over the live row when the payload is empty.
fn updated_row(base: &RecordData, op: &OperationRecord) -> RecordData {
    if !op.data.is_empty() {
        return op.data.clone();
    }

    let mut merged = base.clone();
    if let Some(changes) = &op.changed_fields {
        for (field, value) in changes {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}

fn filter_by_conditions(rows: Vec<RecordData>, conditions: &Conditions) -> Vec<RecordData> {
    if conditions.is_empty() {
        return rows;
    }

    rows.into_iter()
        .filter(|row| {
            conditions.iter().all(|(field, expected)| {
                row.get(field)
                    .map(|actual| values_match(actual, expected))
                    .unwrap_or(false)
            })
        })
        .collect()
}
