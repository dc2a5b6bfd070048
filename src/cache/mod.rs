pub mod connection;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod repository;

pub use connection::CacheConnection;
pub use memory::MemoryCache;
pub use metadata::MetadataStore;
pub use repository::SqliteCache;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Key/value store for exchange metadata (markets, currencies). Order books
/// never go through here.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: serde_json::Value, ttl: std::time::Duration) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = *now + by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub(crate) fn expiry(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    now + Duration::seconds(ttl.as_secs() as i64)
}

pub fn markets_key(exchange: &str) -> String {
    format!("markets:{}", exchange.to_lowercase())
}

pub fn currency_key(exchange: &str, asset: &str) -> String {
    format!("currency:{}:{}", exchange.to_lowercase(), asset.to_uppercase())
}
