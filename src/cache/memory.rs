use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::{expiry, Clock, MetadataCache, SystemClock};

pub struct MemoryCache {
    entries: RwLock<HashMap<String, (serde_json::Value, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let entries = self.entries.read().await;
        let now = self.clock.now();
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: std::time::Duration) -> Result<()> {
        let expires_at = expiry(self.clock.now(), ttl);
        self.entries.write().await.insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_ttl_expiry_with_manual_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::with_clock(clock.clone());

        cache.put("a", json!("x"), std::time::Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(json!("x")));

        clock.advance(Duration::seconds(10));
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.len().await, 1);
    }
}
