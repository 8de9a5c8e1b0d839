//! Redis implementation of the operation cache.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use sandboxer_core::{traits::OperationCache, types::OperationRecord, Error, Result};

/// Redis-backed operation cache, for deployments where the engine runs in
/// more than one process against one backing store.
pub struct RedisOperationCache {
    client: Client,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisOperationCache {
    pub fn new(url: &str, prefix: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::cache(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            ttl_seconds,
        })
    }

    fn key(&self, sandbox_id: &str, table: &str, record_id: &str) -> String {
        format!("{}:{}:{}:{}", self.prefix, sandbox_id, table, record_id)
    }
}

#[async_trait]
impl OperationCache for RedisOperationCache {
    async fn get(
        &self,
        sandbox_id: &str,
        table: &str,
        record_id: &str,
    ) -> Result<Option<OperationRecord>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::cache(format!("Redis connection error: {}", e)))?;

        let key = self.key(sandbox_id, table, record_id);
        let data: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Error::cache(format!("Redis get error: {}", e)))?;

        match data {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| Error::cache(format!("Failed to deserialize record: {}", e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, record: &OperationRecord) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::cache(format!("Redis connection error: {}", e)))?;

        let key = self.key(&record.sandbox_id, &record.table_name, &record.record_id);
        let json = serde_json::to_string(record)
            .map_err(|e| Error::cache(format!("Failed to serialize record: {}", e)))?;

        let _: () = conn
            .set_ex(&key, json, self.ttl_seconds)
            .await
            .map_err(|e| Error::cache(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn invalidate_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::cache(format!("Redis connection error: {}", e)))?;

        let pattern = format!("{}:{}:*", self.prefix, sandbox_id);
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| Error::cache(format!("Redis keys error: {}", e)))?;

        if !keys.is_empty() {
            let _: () = conn
                .del(&keys)
                .await
                .map_err(|e| Error::cache(format!("Redis delete error: {}", e)))?;
        }

        Ok(())
    }
}
