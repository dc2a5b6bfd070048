use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{expiry, models::KvRow, Clock, MetadataCache, SystemClock};

pub struct SqliteCache {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_store WHERE expires_at <= ?")
            .bind(self.clock.now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!("Failed to purge expired cache entries: {}", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetadataCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, KvRow>(
            "SELECT k, v, updated_at, expires_at FROM kv_store WHERE k = ? LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to read cache key {}: {}", key, e))?;

        let row = match row {
            Some(row) if !row.is_expired(self.clock.now()) => row,
            _ => return Ok(None),
        };

        debug!("Cache hit for {} (updated {:?})", row.k, row.updated());
        let value = serde_json::from_str(&row.v)
            .map_err(|e| anyhow!("Corrupt cache value for {}: {}", key, e))?;
        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: std::time::Duration) -> Result<()> {
        let now = self.clock.now();
        let encoded = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO kv_store (k, v, updated_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(&encoded)
        .bind(now.timestamp())
        .bind(expiry(now, ttl).timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to write cache key {}: {}", key, e))?;

        debug!("Cached {} ({} bytes, ttl {:?})", key, encoded.len(), ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConnection, ManualClock};
    use chrono::{Duration, Utc};
    use serde_json::json;

    async fn create_test_cache() -> (SqliteCache, Arc<ManualClock>) {
        let connection = CacheConnection::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = SqliteCache::with_clock(connection.pool().clone(), clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _clock) = create_test_cache().await;

        cache
            .put("markets:binance", json!([{"symbol": "BTC/USDT"}]), std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let value = cache.get("markets:binance").await.unwrap().unwrap();
        assert_eq!(value[0]["symbol"], "BTC/USDT");
        assert!(cache.get("markets:kucoin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let (cache, clock) = create_test_cache().await;

        cache
            .put("currency:binance:USDT", json!({"symbol": "USDT"}), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::seconds(61));

        assert!(cache.get("currency:binance:USDT").await.unwrap().is_none());
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (cache, _clock) = create_test_cache().await;
        let ttl = std::time::Duration::from_secs(60);

        cache.put("k", json!(1), ttl).await.unwrap();
        cache.put("k", json!(2), ttl).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }
}
