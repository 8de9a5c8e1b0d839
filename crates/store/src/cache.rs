//! In-memory read-through cache for operation records.
//!
//! Holds the most recently stored operation per `(sandbox, table, record)`
//! key with an independent TTL. Purely an accelerator: every miss or
//! failure falls back to the store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use sandboxer_core::{traits::OperationCache, types::OperationRecord, Result};

#[derive(Debug, Clone)]
struct CacheEntry {
    record: OperationRecord,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// In-memory operation cache.
pub struct InMemoryOperationCache {
    entries: DashMap<String, CacheEntry>,
    prefix: String,
    default_ttl: Duration,
}

impl InMemoryOperationCache {
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            prefix: prefix.into(),
            default_ttl: ttl,
        }
    }

    fn key(&self, sandbox_id: &str, table: &str, record_id: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, sandbox_id, table, record_id)
    }

    fn sandbox_prefix(&self, sandbox_id: &str) -> String {
        format!("{}:{}:", self.prefix, sandbox_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear expired entries.
    pub fn cleanup(&self) {
        self.entries
            .retain(|_: &String, v: &mut CacheEntry| !v.is_expired());
    }
}

#[async_trait]
impl OperationCache for InMemoryOperationCache {
    async fn get(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        let key = self.key(sandbox_id, table, record_id);

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                tracing::trace!(key = %key, "Operation cache hit");
                return Ok(Some(entry.record.clone()));
            }
        }
        // Expired entries die lazily here rather than on a timer.
        self.entries.remove_if(&key, |_, v| v.is_expired());
        Ok(None)
    }

    async fn put(&self, record: &OperationRecord) -> Result<()> {
        let key = self.key(&record.sandbox_id, &record.table_name, &record.record_id);
        self.entries.insert(
            key,
            CacheEntry {
                record: record.clone(),
                stored_at: Instant::now(),
                ttl: self.default_ttl,
            },
        );
        Ok(())
    }

    async fn invalidate_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let prefix = self.sandbox_prefix(sandbox_id);
        self.entries
            .retain(|key: &String, _: &mut CacheEntry| !key.starts_with(&prefix));
        tracing::debug!(sandbox = %sandbox_id, "Invalidated cache entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandboxer_core::types::{Operation, RecordData};
    use serde_json::json;

    fn record(sandbox: &str, table: &str, record_id: &str, sequence: i64) -> OperationRecord {
        OperationRecord {
            id: format!("op-{}", sequence),
            sandbox_id: sandbox.into(),
            table_name: table.into(),
            record_id: record_id.into(),
            operation: Operation::Insert,
            data: serde_json::from_value::<RecordData>(json!({"id": record_id})).unwrap(),
            changed_fields: None,
            sequence,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_latest() {
        let cache = InMemoryOperationCache::new("sandbox", Duration::from_secs(60));

        cache.put(&record("s1", "posts", "a", 0)).await.unwrap();
        cache.put(&record("s1", "posts", "a", 1)).await.unwrap();

        let hit = cache.get("s1", "posts", "a").await.unwrap().unwrap();
        assert_eq!(hit.sequence, 1);
        assert!(cache.get("s1", "posts", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = InMemoryOperationCache::new("sandbox", Duration::from_millis(0));
        cache.put(&record("s1", "posts", "a", 0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("s1", "posts", "a").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_the_sandbox() {
        let cache = InMemoryOperationCache::new("sandbox", Duration::from_secs(60));
        cache.put(&record("s1", "posts", "a", 0)).await.unwrap();
        cache.put(&record("s2", "posts", "a", 0)).await.unwrap();

        cache.invalidate_sandbox("s1").await.unwrap();

        assert!(cache.get("s1", "posts", "a").await.unwrap().is_none());
        assert!(cache.get("s2", "posts", "a").await.unwrap().is_some());
    }
}
