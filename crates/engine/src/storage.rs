//! Cache-then-store access to the operation log.
//!
//! The store is the source of truth; the cache only accelerates
//! single-record lookups. Every cache failure degrades to a store
//! round-trip with a warning.

use std::sync::Arc;

use sandboxer_core::{
    traits::{OperationCache, OperationStore},
    types::{NewOperation, OperationRecord},
    Result,
};

/// Storage service shared by the interceptor, resolver, and registry.
pub struct OverlayStorage {
    ops: Arc<dyn OperationStore>,
    cache: Option<Arc<dyn OperationCache>>,
}

impl OverlayStorage {
    pub fn new(ops: Arc<dyn OperationStore>) -> Self {
        Self { ops, cache: None }
    }

    /// Attach a read-through cache.
    pub fn with_cache(mut self, cache: Arc<dyn OperationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Append to the store, then opportunistically refresh the cache entry
    /// for the written key.
    pub async fn append(&self, op: NewOperation) -> Result<OperationRecord> {
        let record = self.ops.append_next(op).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&record).await {
                tracing::warn!(error = %e, "Cache population failed, store remains authoritative");
            }
        }

        Ok(record)
    }

    /// All operations for a sandbox and table, sequence ascending. The
    /// cache is not range-queryable, so this always reads the store and
    /// warms the cache afterward.
    pub async fn records_for_table(
        &self,
        sandbox_id: &str,
        table: &str,
    ) -> Result<Vec<OperationRecord>> {
        let records = self.ops.records_for_table(sandbox_id, table).await?;

        if let Some(cache) = &self.cache {
            // Ascending order: the last put per key is the latest write.
            for record in &records {
                if let Err(e) = cache.put(record).await {
                    tracing::warn!(error = %e, "Cache warm-up aborted");
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Latest operation for one logical row, cache first.
    pub async fn find_record(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        if let Some(cache) = &self.cache {
            match cache.get(sandbox_id, table, record_id).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Cache read failed, degrading to store");
                }
            }
        }

        let found = self.ops.latest_for_record(sandbox_id, table, record_id).await?;

        if let (Some(cache), Some(record)) = (&self.cache, &found) {
            if let Err(e) = cache.put(record).await {
                tracing::warn!(error = %e, "Cache population failed, store remains authoritative");
            }
        }

        Ok(found)
    }

    /// Delete a sandbox's operations and drop its cache entries.
    pub async fn delete_sandbox(&self, sandbox_id: &str) -> Result<usize> {
        let removed = self.ops.delete_for_sandbox(sandbox_id).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_sandbox(sandbox_id).await {
                tracing::warn!(error = %e, "Cache invalidation failed; entries expire by TTL");
            }
        }

        Ok(removed)
    }
}
