use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    cache::{currency_key, markets_key, MetadataCache},
    config::CacheConfig,
    error::ConnectivityError,
    exchange::ExchangeClient,
    types::{Currency, Market},
};

/// Read-through cache in front of the exchange clients. At most one refresh
/// per key is in flight; concurrent callers wait and then read the fresh entry.
pub struct MetadataStore {
    cache: Arc<dyn MetadataCache>,
    markets_ttl: Duration,
    currencies_ttl: Duration,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataStore {
    pub fn new(cache: Arc<dyn MetadataCache>, config: &CacheConfig) -> Self {
        Self::with_ttls(
            cache,
            Duration::from_secs(config.markets_ttl_seconds),
            Duration::from_secs(config.currencies_ttl_seconds),
        )
    }

    pub fn with_ttls(cache: Arc<dyn MetadataCache>, markets_ttl: Duration, currencies_ttl: Duration) -> Self {
        Self {
            cache,
            markets_ttl,
            currencies_ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn markets(&self, client: &dyn ExchangeClient) -> Result<Vec<Market>> {
        let key = markets_key(client.name());
        self.get_or_fetch(&key, self.markets_ttl, false, || client.list_markets())
            .await
    }

    /// Bypasses the cached entry and stores a fresh market list.
    pub async fn refresh_markets(&self, client: &dyn ExchangeClient) -> Result<Vec<Market>> {
        let key = markets_key(client.name());
        self.get_or_fetch(&key, self.markets_ttl, true, || client.list_markets())
            .await
    }

    pub async fn currency(&self, client: &dyn ExchangeClient, asset: &str) -> Result<Currency> {
        let key = currency_key(client.name(), asset);
        self.get_or_fetch(&key, self.currencies_ttl, false, || client.currency_metadata(asset))
            .await
    }

    async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, force: bool, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectivityError>>,
    {
        if !force {
            if let Some(value) = self.read(key).await {
                return Ok(value);
            }
        }

        let guard = self.key_lock(key).await;
        let _held = guard.lock().await;

        // another caller may have refreshed while we waited
        if !force {
            if let Some(value) = self.read(key).await {
                return Ok(value);
            }
        }

        debug!("Refreshing {}", key);
        let value = fetch()
            .await
            .map_err(|e| anyhow!("Failed to refresh {}: {}", key, e))?;

        match serde_json::to_value(&value) {
            Ok(encoded) => {
                if let Err(e) = self.cache.put(key, encoded, ttl).await {
                    warn!("Failed to cache {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to encode {}: {}", key, e),
        }

        Ok(value)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_value(raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Clock, ManualClock, MemoryCache};
    use crate::types::RawOrderBook;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        market_calls: AtomicUsize,
        currency_calls: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                market_calls: AtomicUsize::new(0),
                currency_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for CountingClient {
        fn name(&self) -> &str {
            "counting"
        }

        async fn list_markets(&self) -> Result<Vec<Market>, ConnectivityError> {
            self.market_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![Market {
                exchange: "counting".to_string(),
                symbol_id: "BTCUSDT".to_string(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                taker_fee: BigDecimal::from_str("0.001").unwrap(),
                active: true,
            }])
        }

        async fn fetch_order_book(&self, _market: &Market, _limit: u32) -> Result<RawOrderBook, ConnectivityError> {
            Ok(RawOrderBook::default())
        }

        async fn currency_metadata(&self, asset: &str) -> Result<Currency, ConnectivityError> {
            self.currency_calls.fetch_add(1, Ordering::SeqCst);
            if asset == "NOPE" {
                return Err(ConnectivityError::Unsupported {
                    exchange: "counting".to_string(),
                    operation: format!("withdrawals of {}", asset),
                });
            }
            Ok(Currency {
                exchange: "counting".to_string(),
                symbol: asset.to_string(),
                networks: BTreeMap::new(),
            })
        }
    }

    fn create_test_store(clock: Arc<ManualClock>) -> MetadataStore {
        let cache = Arc::new(MemoryCache::with_clock(clock as Arc<dyn Clock>));
        MetadataStore::with_ttls(cache, Duration::from_secs(3600), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_concurrent_reads_fetch_once() {
        let store = create_test_store(Arc::new(ManualClock::new(Utc::now())));
        let client = CountingClient::new();

        let (a, b, c) = tokio::join!(store.markets(&client), store.markets(&client), store.markets(&client));

        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(c.unwrap().len(), 1);
        assert_eq!(client.market_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = create_test_store(clock.clone());
        let client = CountingClient::new();

        store.currency(&client, "USDT").await.unwrap();
        store.currency(&client, "USDT").await.unwrap();
        assert_eq!(client.currency_calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(61));
        store.currency(&client, "USDT").await.unwrap();
        assert_eq!(client.currency_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_cache() {
        let store = create_test_store(Arc::new(ManualClock::new(Utc::now())));
        let client = CountingClient::new();

        store.markets(&client).await.unwrap();
        store.refresh_markets(&client).await.unwrap();
        store.markets(&client).await.unwrap();

        assert_eq!(client.market_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_cached() {
        let store = create_test_store(Arc::new(ManualClock::new(Utc::now())));
        let client = CountingClient::new();

        assert!(store.currency(&client, "NOPE").await.is_err());
        assert!(store.currency(&client, "NOPE").await.is_err());
        assert_eq!(client.currency_calls.load(Ordering::SeqCst), 2);
    }
}
